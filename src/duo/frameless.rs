use serde::Deserialize;

use crate::duo::{origin, FACTOR_PUSH};
use crate::error::{Error, Result};
use crate::html_form::find_first_form;

/// Correlation tokens for one frameless Duo transaction.
#[derive(Debug, Clone)]
pub struct DuoSession {
    pub sid: String,
    pub txid: String,
    pub xsrf: String,
    pub origin: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Phone {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
}

const MAX_FORM_HOPS: usize = 3;

/// Walks the hidden-form redirect chain from the OIDC remediation href
/// until a page whose form exposes `sid`/`_xsrf` is reached.
///
/// Each hop submits whatever hidden fields the previous page returned; the
/// cookie jar picks up the Duo session along the way.
pub async fn auth_from_response(
    http_client: &reqwest::Client,
    start_url: &str,
) -> Result<DuoSession> {
    let mut response = http_client.get(start_url).send().await?;

    for _ in 0..MAX_FORM_HOPS {
        Error::check_status("duo auth chain", response.status())?;
        let page_url = response.url().clone();
        let body = response.text().await?;
        let form = find_first_form(&body).ok_or(Error::NoDuoForm)?;

        if let (Some(sid), Some(xsrf)) = (form.fields.get("sid"), form.fields.get("_xsrf")) {
            return Ok(DuoSession {
                sid: sid.clone(),
                xsrf: xsrf.clone(),
                txid: String::new(),
                origin: origin(&page_url.origin().ascii_serialization()),
            });
        }

        let action = page_url
            .join(&form.action)
            .map_err(|e| Error::malformed("duo auth chain", e.to_string()))?;
        let fields: Vec<(&str, &str)> = form
            .fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        response = http_client.post(action).form(&fields).send().await?;
    }

    Err(Error::NoDuoForm)
}

/// OIDC-oriented push flow against Duo's `/frame/v4/*` endpoints.
pub struct DuoFramelessClient<'a> {
    http_client: &'a reqwest::Client,
}

impl<'a> DuoFramelessClient<'a> {
    pub fn new(http_client: &'a reqwest::Client) -> Self {
        DuoFramelessClient { http_client }
    }

    /// The phones registered for this user. Push target selection pins to
    /// the first phone returned; the classic client matches a named device
    /// instead, and that difference is kept as observed.
    pub async fn get_registered_factors(&self, session: &DuoSession) -> Result<Vec<Phone>> {
        let url = format!(
            "{}/frame/v4/auth/prompt/data?post_auth_action=OIDC_EXIT&sid={}",
            session.origin, session.sid
        );
        let response = self.http_client.get(&url).send().await?;
        Error::check_status("/frame/v4/auth/prompt/data", response.status())?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::malformed("/frame/v4/auth/prompt/data", e.to_string()))?;
        let phones = body
            .pointer("/response/phones")
            .and_then(|value| value.as_array())
            .ok_or_else(|| Error::malformed("/frame/v4/auth/prompt/data", "missing phones"))?;
        Ok(phones
            .iter()
            .filter_map(|phone| serde_json::from_value(phone.clone()).ok())
            .collect())
    }

    /// Sends the push and records the transaction id on the session.
    ///
    /// The prompt schema drifts between deployments, so the `txid` is
    /// pulled straight out of the body instead of a full struct decode.
    pub async fn prompt(&self, session: &mut DuoSession, device_key: &str) -> Result<()> {
        let url = format!("{}/frame/v4/prompt", session.origin);
        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("sid", session.sid.as_str()),
                ("device", device_key),
                ("factor", FACTOR_PUSH),
                ("postAuthDestination", "OIDC_EXIT"),
            ])
            .send()
            .await?;
        Error::check_status("/frame/v4/prompt", response.status())?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::malformed("/frame/v4/prompt", e.to_string()))?;
        let txid = body
            .pointer("/response/txid")
            .and_then(|value| value.as_str())
            .ok_or_else(|| Error::malformed("/frame/v4/prompt", "missing txid"))?;
        session.txid = txid.to_string();
        Ok(())
    }

    /// Two status polls: the first resolves "was the push delivered", the
    /// second blocks server-side until the user acts. Any non-affirmative
    /// outcome, denial included, surfaces as `MfaNotAllowed`.
    pub async fn wait_for_push_acknowledgement(&self, session: &DuoSession) -> Result<()> {
        let delivered = self.check_status(session).await?;
        if delivered != "pushed" {
            return Err(Error::MfaNotAllowed(format!(
                "push was not delivered (status {:?})",
                delivered
            )));
        }

        let decision = self.check_status(session).await?;
        if decision != "allow" {
            return Err(Error::MfaNotAllowed(format!(
                "challenge ended with status {:?}",
                decision
            )));
        }
        Ok(())
    }

    async fn check_status(&self, session: &DuoSession) -> Result<String> {
        let url = format!("{}/frame/v4/status", session.origin);
        let response = self
            .http_client
            .post(&url)
            .form(&[("txid", session.txid.as_str()), ("sid", session.sid.as_str())])
            .send()
            .await?;
        Error::check_status("/frame/v4/status", response.status())?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::malformed("/frame/v4/status", e.to_string()))?;
        if body.pointer("/stat").and_then(|v| v.as_str()) != Some("OK") {
            return Err(Error::MfaNotAllowed(format!(
                "status poll failed (stat {:?})",
                body.pointer("/stat")
            )));
        }
        Ok(body
            .pointer("/response/status_code")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Redirects back into the identity provider's session, completing the
    /// upgrade. The continuation endpoint is known to return 500 even on a
    /// fully successful login, so server errors here are logged and left
    /// for the orchestrator's single bounded entry retry.
    pub async fn exit(&self, session: &DuoSession, device_key: &str) -> Result<()> {
        let url = format!("{}/frame/v4/oidc/exit", session.origin);
        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("sid", session.sid.as_str()),
                ("txid", session.txid.as_str()),
                ("factor", FACTOR_PUSH),
                ("device_key", device_key),
                ("_xsrf", session.xsrf.as_str()),
                ("dampen_choice", "true"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            log::debug!("oidc exit continuation returned {}", status);
            return Ok(());
        }
        Error::check_status("/frame/v4/oidc/exit", status)?;
        Ok(())
    }
}
