use serde::Deserialize;

use crate::authn::Credentials;
use crate::error::{Error, Result};

/// Client for the identity provider's multi-step JSON authentication
/// protocol: `identify` to submit credentials, `introspect` to inspect the
/// transaction state. Completion is not reliably signaled by the upgrade
/// call's own status, so `introspect` doubles as the final "am I actually
/// done" check for both upgrade paths.
pub struct IdxClient<'a> {
    pub http_client: &'a reqwest::Client,
    pub base_uri: &'a str,
}

#[derive(Deserialize, Debug, Default)]
pub struct IdxResponse {
    #[serde(rename = "stateHandle", default)]
    pub state_handle: String,
    #[serde(default)]
    pub remediation: RemediationList,
    #[serde(rename = "currentAuthenticatorEnrollment", default)]
    pub current_authenticator_enrollment: Option<EnrollmentWrapper>,
    #[serde(default)]
    pub success: Option<SuccessLink>,
}

#[derive(Deserialize, Debug, Default)]
pub struct RemediationList {
    #[serde(default)]
    pub value: Vec<Remediation>,
}

/// One candidate next step. The payload is genuinely schema-fluid, so only
/// the discriminating fields are typed; the remainder stays dynamic.
#[derive(Deserialize, Debug)]
pub struct Remediation {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub method: String,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

#[derive(Deserialize, Debug)]
pub struct EnrollmentWrapper {
    pub value: AuthenticatorEnrollment,
}

#[derive(Deserialize, Debug)]
pub struct AuthenticatorEnrollment {
    #[serde(default)]
    pub key: String,
    #[serde(rename = "contextualData", default)]
    pub contextual_data: Option<DuoContextualData>,
}

#[derive(Deserialize, Debug)]
pub struct DuoContextualData {
    #[serde(default)]
    pub host: String,
    #[serde(rename = "signedToken", default)]
    pub signed_token: String,
}

#[derive(Deserialize, Debug)]
pub struct SuccessLink {
    #[serde(default)]
    pub name: String,
    pub href: String,
}

impl<'a> IdxClient<'a> {
    /// Inspects the transaction behind a state token. After the chosen
    /// upgrade completes, the response carries `success.href`.
    pub async fn introspect(&self, state_token: &str) -> Result<IdxResponse> {
        let uri = format!("{}/idp/idx/introspect", self.base_uri);
        let response = self
            .http_client
            .post(&uri)
            .json(&serde_json::json!({ "stateToken": state_token }))
            .send()
            .await?;
        Error::check_status("/idp/idx/introspect", response.status())?;
        response
            .json()
            .await
            .map_err(|e| Error::malformed("/idp/idx/introspect", e.to_string()))
    }

    /// Submits credentials against a state handle. The response carries the
    /// candidate next steps and, when a Duo authenticator is already
    /// enrolled, the signed token + host shortcut for the classic flow.
    pub async fn identify(
        &self,
        state_handle: &str,
        credentials: &Credentials,
    ) -> Result<IdxResponse> {
        let uri = format!("{}/idp/idx/identify", self.base_uri);
        let response = self
            .http_client
            .post(&uri)
            .json(&serde_json::json!({
                "identifier": credentials.username,
                "credentials": { "passcode": credentials.password },
                "stateHandle": state_handle,
            }))
            .send()
            .await?;
        Error::check_status("/idp/idx/identify", response.status())?;
        response
            .json()
            .await
            .map_err(|e| Error::malformed("/idp/idx/identify", e.to_string()))
    }
}
