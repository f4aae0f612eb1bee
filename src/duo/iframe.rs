use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::duo::{origin, DuoFactor, FACTOR_PASSCODE, FACTOR_PUSH, PUSH_DEVICE};
use crate::error::{Error, Result};
use crate::html_form::find_first_form;
use crate::upgrade::SignedToken;

/// Legacy polling push/passcode flow against Duo's `/frame/*` endpoints.
///
/// A single login is correlated by `sid`, which Duo issues by echoing it
/// into a hidden input of the auth frame; everything after that threads the
/// `sid` (and the `txid` of the push transaction) through each request.
pub struct DuoIframeClient<'a> {
    http_client: &'a reqwest::Client,
    origin: String,
}

#[derive(Deserialize, Debug)]
struct FrameEnvelope<T> {
    stat: String,
    response: Option<T>,
}

#[derive(Deserialize, Debug)]
struct PromptResult {
    txid: String,
}

#[derive(Deserialize, Debug, Default)]
struct StatusResult {
    #[serde(default)]
    status_code: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    cookie: String,
    #[serde(default)]
    result_url: String,
}

impl<'a> DuoIframeClient<'a> {
    pub fn new(http_client: &'a reqwest::Client, host: &str) -> Self {
        DuoIframeClient {
            http_client,
            origin: origin(host),
        }
    }

    /// Runs the challenge to completion and returns the Duo MFA cookie.
    pub async fn approve(
        &self,
        token: &SignedToken,
        parent: &str,
        factor: &DuoFactor,
    ) -> Result<String> {
        let sid = self.get_sid(&token.tx, parent).await?;
        self.prepare(&sid).await?;

        let txid = match factor {
            DuoFactor::Push => self.send_push(&sid).await?,
            DuoFactor::Passcode(code) => self.send_code(&sid, code).await?,
        };
        log::debug!("duo txid: {}", txid);

        if matches!(factor, DuoFactor::Push) {
            // First poll answers "was the push delivered"; the user has not
            // acted yet, so anything but "pushed" is a send failure rather
            // than a denial.
            let delivered = self.check_status(&sid, &txid).await?;
            if delivered.status_code != "pushed" {
                return Err(Error::MfaNotAllowed(format!(
                    "push was not delivered (status {:?})",
                    delivered.status_code
                )));
            }
        }

        // Second poll blocks server-side until the user acts.
        let decision = self.check_status(&sid, &txid).await?;
        if decision.status_code != "allow" {
            return Err(Error::MfaNotAllowed(format!(
                "challenge ended with status {:?} ({})",
                decision.status_code, decision.result
            )));
        }
        if decision.cookie.is_empty() {
            return Err(Error::malformed("/frame/status", "allow without cookie"));
        }
        Ok(decision.cookie)
    }

    /// Opens the auth frame and scrapes the `sid` out of its hidden form.
    async fn get_sid(&self, tx: &str, parent: &str) -> Result<String> {
        let url = format!(
            "{}/frame/web/v1/auth?tx={}&parent={}&v=2.6",
            self.origin, tx, parent
        );
        let response = self
            .http_client
            .post(&url)
            .form(&[("tx", tx), ("parent", parent)])
            .send()
            .await?;
        Error::check_status("/frame/web/v1/auth", response.status())?;

        let body = response.text().await?;
        let form = find_first_form(&body).ok_or(Error::NoDuoForm)?;
        match form.fields.get("sid") {
            Some(sid) if !sid.is_empty() => Ok(sid.clone()),
            _ => Err(Error::NoDuoForm),
        }
    }

    /// Mimics the reference client's request sequence. The result carries
    /// nothing this flow consumes, so it is ignored.
    async fn prepare(&self, sid: &str) -> Result<()> {
        let url = format!("{}/frame/web/v1/auth", self.origin);
        let response = self
            .http_client
            .post(&url)
            .form(&[("sid", sid), ("certs_url", "")])
            .send()
            .await?;
        log::debug!("duo prepare returned {}", response.status());
        Ok(())
    }

    async fn send_push(&self, sid: &str) -> Result<String> {
        self.prompt(&[
            ("sid", sid),
            ("device", PUSH_DEVICE),
            ("factor", FACTOR_PUSH),
            ("out_of_date", ""),
        ])
        .await
    }

    async fn send_code(&self, sid: &str, code: &str) -> Result<String> {
        self.prompt(&[
            ("sid", sid),
            ("device", PUSH_DEVICE),
            ("factor", FACTOR_PASSCODE),
            ("passcode", code),
        ])
        .await
    }

    async fn prompt(&self, fields: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/frame/prompt", self.origin);
        let response = self.http_client.post(&url).form(fields).send().await?;
        Error::check_status("/frame/prompt", response.status())?;

        let envelope: FrameEnvelope<PromptResult> =
            decode_frame("/frame/prompt", response).await?;
        if envelope.stat != "OK" {
            return Err(Error::MfaNotAllowed(format!(
                "prompt request failed (stat {:?})",
                envelope.stat
            )));
        }
        envelope
            .response
            .map(|result| result.txid)
            .ok_or_else(|| Error::malformed("/frame/prompt", "missing txid"))
    }

    /// One status poll. When the response points at a `result_url`, Duo
    /// requires one further hop with the `sid` to obtain the final cookie,
    /// and that hop's payload replaces this one.
    async fn check_status(&self, sid: &str, txid: &str) -> Result<StatusResult> {
        let url = format!("{}/frame/status", self.origin);
        let response = self
            .http_client
            .post(&url)
            .form(&[("sid", sid), ("txid", txid)])
            .send()
            .await?;
        Error::check_status("/frame/status", response.status())?;

        let envelope: FrameEnvelope<StatusResult> =
            decode_frame("/frame/status", response).await?;
        if envelope.stat != "OK" {
            return Err(Error::MfaNotAllowed(format!(
                "status poll failed (stat {:?})",
                envelope.stat
            )));
        }
        let status = envelope
            .response
            .ok_or_else(|| Error::malformed("/frame/status", "missing response"))?;

        if status.result_url.is_empty() {
            return Ok(status);
        }

        let url = format!("{}{}", self.origin, status.result_url);
        let response = self
            .http_client
            .post(&url)
            .form(&[("sid", sid)])
            .send()
            .await?;
        Error::check_status("result_url", response.status())?;

        let envelope: FrameEnvelope<StatusResult> = decode_frame("result_url", response).await?;
        if envelope.stat != "OK" {
            return Err(Error::MfaNotAllowed(format!(
                "result fetch failed (stat {:?})",
                envelope.stat
            )));
        }
        let mut followed = envelope
            .response
            .ok_or_else(|| Error::malformed("result_url", "missing response"))?;
        if followed.status_code.is_empty() {
            // Some deployments only restate the result on the final hop.
            followed.status_code = status.status_code;
        }
        Ok(followed)
    }
}

async fn decode_frame<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<FrameEnvelope<T>> {
    response
        .json()
        .await
        .map_err(|e| Error::malformed(endpoint, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_envelope() {
        let body = r#"{"stat": "OK", "response": {
            "status_code": "allow", "result": "SUCCESS",
            "cookie": "AUTH|zzz", "result_url": ""
        }}"#;
        let envelope: FrameEnvelope<StatusResult> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.stat, "OK");
        let status = envelope.response.unwrap();
        assert_eq!(status.status_code, "allow");
        assert_eq!(status.cookie, "AUTH|zzz");
    }

    #[test]
    fn missing_fields_default_empty() {
        let body = r#"{"stat": "OK", "response": {"status_code": "pushed"}}"#;
        let envelope: FrameEnvelope<StatusResult> = serde_json::from_str(body).unwrap();
        let status = envelope.response.unwrap();
        assert!(status.cookie.is_empty());
        assert!(status.result_url.is_empty());
    }
}
