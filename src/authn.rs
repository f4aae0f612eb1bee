use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// End-user secret, held in memory for the duration of one login and never
/// persisted or logged.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct AuthnOptions {
    #[serde(rename = "multiOptionalFactorEnroll")]
    multi_optional_factor_enroll: bool,
    #[serde(rename = "warnBeforePasswordExpired")]
    warn_before_password_expired: bool,
}

#[derive(Serialize)]
struct AuthnRequest<'a> {
    username: &'a str,
    password: &'a str,
    options: AuthnOptions,
}

#[derive(Deserialize, Debug)]
pub struct AuthnResponse {
    pub status: String,
    #[serde(rename = "stateToken", default)]
    pub state_token: String,
    #[serde(rename = "sessionToken", default)]
    pub session_token: Option<String>,
    #[serde(rename = "_embedded", default)]
    pub embedded: AuthnEmbedded,
}

#[derive(Deserialize, Debug, Default)]
pub struct AuthnEmbedded {
    #[serde(default)]
    pub factors: Vec<MfaFactor>,
}

#[derive(Deserialize, Debug)]
pub struct MfaFactor {
    pub provider: String,
    #[serde(rename = "factorType")]
    pub factor_type: String,
    #[serde(rename = "_links", default)]
    links: HashMap<String, Link>,
}

#[derive(Deserialize, Debug)]
struct Link {
    href: String,
}

impl MfaFactor {
    pub fn verify_url(&self) -> Option<&str> {
        self.links.get("verify").map(|link| link.href.as_str())
    }

    /// The factor the legacy flow steps up with.
    pub fn is_duo_web(&self) -> bool {
        self.provider == "DUO" && self.factor_type == "web"
    }
}

/// Posts username/password to the legacy authentication endpoint.
///
/// One POST, no retries; HTTP outcomes are mapped to the engine taxonomy
/// rather than leaking provider codes.
pub async fn verify_credentials(
    client: &reqwest::Client,
    base_uri: &str,
    credentials: &Credentials,
) -> Result<AuthnResponse> {
    let uri = format!("{}/api/v1/authn", base_uri);
    let response = client
        .post(&uri)
        .json(&AuthnRequest {
            username: &credentials.username,
            password: &credentials.password,
            options: AuthnOptions {
                multi_optional_factor_enroll: false,
                warn_before_password_expired: false,
            },
        })
        .send()
        .await?;

    Error::check_status("/api/v1/authn", response.status())?;

    let resp: AuthnResponse = response
        .json()
        .await
        .map_err(|e| Error::malformed("/api/v1/authn", e.to_string()))?;
    log::debug!("authn status: {}", resp.status);
    Ok(resp)
}

// Challenge shapes for the Duo web factor: POSTing the factor's verify link
// yields an embedded verification block with the Duo host, the signed token
// and the completion callback.

#[derive(Deserialize, Debug)]
pub struct ChallengeResponse {
    pub status: String,
    #[serde(rename = "stateToken", default)]
    pub state_token: String,
    #[serde(rename = "_embedded", default)]
    embedded: Option<ChallengeEmbedded>,
}

#[derive(Deserialize, Debug)]
struct ChallengeEmbedded {
    factor: Option<ChallengeFactor>,
}

#[derive(Deserialize, Debug)]
struct ChallengeFactor {
    #[serde(rename = "_embedded")]
    embedded: Option<FactorEmbedded>,
}

#[derive(Deserialize, Debug)]
struct FactorEmbedded {
    verification: Option<DuoVerification>,
}

#[derive(Deserialize, Debug)]
pub struct DuoVerification {
    pub host: String,
    pub signature: String,
    #[serde(rename = "_links", default)]
    links: HashMap<String, Link>,
}

impl ChallengeResponse {
    pub fn verification(self) -> Result<DuoVerification> {
        self.embedded
            .and_then(|e| e.factor)
            .and_then(|f| f.embedded)
            .and_then(|f| f.verification)
            .ok_or(Error::NoSupportedUpgradePath)
    }
}

impl DuoVerification {
    pub fn complete_url(&self) -> Result<&str> {
        self.links
            .get("complete")
            .map(|link| link.href.as_str())
            .ok_or_else(|| Error::malformed("factor verify", "missing complete link"))
    }
}

/// Starts the Duo web factor challenge against the factor's verify link.
pub async fn challenge_factor(
    client: &reqwest::Client,
    verify_url: &str,
    state_token: &str,
) -> Result<ChallengeResponse> {
    let mut body = HashMap::new();
    body.insert("stateToken", state_token);

    let response = client.post(verify_url).json(&body).send().await?;
    Error::check_status("factor verify", response.status())?;
    response
        .json()
        .await
        .map_err(|e| Error::malformed("factor verify", e.to_string()))
}

/// Completes the factor with the recombined Duo signature; on success the
/// response carries the session token the app fetch needs.
pub async fn complete_factor(
    client: &reqwest::Client,
    complete_url: &str,
    state_token: &str,
    sig_response: &str,
) -> Result<AuthnResponse> {
    let response = client
        .post(complete_url)
        .form(&[("stateToken", state_token), ("sig_response", sig_response)])
        .send()
        .await?;
    Error::check_status("factor complete", response.status())?;
    response
        .json()
        .await
        .map_err(|e| Error::malformed("factor complete", e.to_string()))
}
