use crate::error::{Error, Result};
use crate::idx::IdxResponse;

/// The two generations of Duo's web MFA protocol, as a closed set: the
/// selection below is exhaustive-checked instead of a run-time type switch.
#[derive(Debug, Clone)]
pub enum Upgrade {
    Iframe(IframeUpgrade),
    Frameless(FramelessUpgrade),
}

/// Classic step-up: poll/cookie flow against the Duo auth frame, completed
/// by posting the recombined signature back to the provider's callback.
#[derive(Debug, Clone)]
pub struct IframeUpgrade {
    pub duo_host: String,
    pub signed_token: SignedToken,
    pub callback_href: String,
    pub callback_method: String,
}

/// Frameless step-up: OIDC token exchange entered through a redirect chain.
#[derive(Debug, Clone)]
pub struct FramelessUpgrade {
    pub redirect_href: String,
}

/// The provider→Duo handoff token, `TX...:APP...`. The transaction half is
/// what the Duo frame consumes; the application half is recombined with the
/// Duo MFA cookie before being posted back.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub tx: String,
    pub app: String,
}

impl SignedToken {
    pub fn parse(signed: &str) -> Result<SignedToken> {
        let (tx, app) = signed
            .split_once(':')
            .ok_or_else(|| Error::malformed("signed token", "expected TX:APP shape"))?;
        if tx.is_empty() || app.is_empty() {
            return Err(Error::malformed("signed token", "empty half"));
        }
        Ok(SignedToken {
            tx: tx.to_string(),
            app: app.to_string(),
        })
    }

    pub fn sig_response(&self, auth_cookie: &str) -> String {
        format!("{}:{}", auth_cookie, self.app)
    }
}

/// Inspects the remediation payload and chooses the upgrade capability.
///
/// Deterministic, first match wins:
///  1. any remediation of type `OIDC` selects the frameless flow;
///  2. else a challenge remediation plus a current `duo` enrollment selects
///     the classic flow, with the enrollment's signed token and host;
///  3. else the account has no upgrade path this engine understands.
pub fn determine_upgrade_path(idx: &IdxResponse) -> Result<Upgrade> {
    if let Some(remediation) = idx.remediation.value.iter().find(|r| r.kind == "OIDC") {
        return Ok(Upgrade::Frameless(FramelessUpgrade {
            redirect_href: remediation.href.clone(),
        }));
    }

    let challenge = idx.remediation.value.iter().find(|r| {
        r.name == "select-authenticator-authenticate" || r.name == "challenge-authenticator"
    });
    if let (Some(remediation), Some(enrollment)) =
        (challenge, idx.current_authenticator_enrollment.as_ref())
    {
        let enrollment = &enrollment.value;
        if enrollment.key == "duo" {
            if let Some(data) = &enrollment.contextual_data {
                return Ok(Upgrade::Iframe(IframeUpgrade {
                    duo_host: data.host.clone(),
                    signed_token: SignedToken::parse(&data.signed_token)?,
                    callback_href: remediation.href.clone(),
                    callback_method: if remediation.method.is_empty() {
                        "POST".to_string()
                    } else {
                        remediation.method.clone()
                    },
                }));
            }
        }
    }

    Err(Error::NoSupportedUpgradePath)
}
