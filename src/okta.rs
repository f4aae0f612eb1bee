use regex::Regex;
use serde::Deserialize;

use crate::authn::{self, Credentials};
use crate::duo::frameless::{self, DuoFramelessClient};
use crate::duo::iframe::DuoIframeClient;
use crate::duo::DuoFactor;
use crate::error::{Error, Result};
use crate::html_form::{find_first_form, find_form_by_id};
use crate::idx::IdxClient;
use crate::saml::SamlResponse;
use crate::upgrade::{determine_upgrade_path, IframeUpgrade, SignedToken, Upgrade};

/// The federated login orchestrator.
///
/// `http_client` must be a fresh cookie-jar client per login
/// (`http_client::create_login_client`): the flow depends on each request
/// seeing the cookies of the previous one, and nothing here is shared
/// across logins.
pub struct Okta<'a> {
    pub http_client: &'a reqwest::Client,
    pub base_uri: &'a str,
    pub app_link: &'a str,
}

impl Okta<'_> {
    /// Drives one login to a decoded SAML assertion.
    ///
    /// The entry page decides the generation: an embedded state token means
    /// the IDX flow, its absence means the legacy authn flow.
    pub async fn get_saml_assertion(
        &self,
        credentials: &Credentials,
        factor: &DuoFactor,
    ) -> Result<SamlResponse> {
        let response = self.http_client.get(self.app_link).send().await?;
        Error::check_status("app entry", response.status())?;
        let body = response.text().await?;

        match extract_state_token(&body) {
            Some(state_token) => {
                log::debug!("entry page carries a state token, using the IDX flow");
                self.idx_login(credentials, &state_token, factor).await
            }
            None => {
                log::debug!("no embedded state token, using the legacy authn flow");
                self.legacy_login(credentials, factor).await
            }
        }
    }

    async fn idx_login(
        &self,
        credentials: &Credentials,
        state_token: &str,
        factor: &DuoFactor,
    ) -> Result<SamlResponse> {
        let idx = IdxClient {
            http_client: self.http_client,
            base_uri: self.base_uri,
        };

        let introspected = idx.introspect(state_token).await?;
        let state_handle = if introspected.state_handle.is_empty() {
            state_token.to_string()
        } else {
            introspected.state_handle.clone()
        };
        let identified = idx.identify(&state_handle, credentials).await?;

        match determine_upgrade_path(&identified)? {
            Upgrade::Iframe(upgrade) => {
                let duo = DuoIframeClient::new(self.http_client, &upgrade.duo_host);
                let cookie = duo
                    .approve(&upgrade.signed_token, &upgrade.callback_href, factor)
                    .await?;
                let sig_response = upgrade.signed_token.sig_response(&cookie);
                self.complete_callback(&upgrade, &identified.state_handle, &sig_response)
                    .await?;
                // The jar now carries an upgraded session; the entry URL
                // serves the assertion form directly.
                self.fetch_assertion(self.app_link).await
            }
            Upgrade::Frameless(upgrade) => {
                let mut session =
                    frameless::auth_from_response(self.http_client, &upgrade.redirect_href)
                        .await?;
                let duo = DuoFramelessClient::new(self.http_client);
                let phones = duo.get_registered_factors(&session).await?;
                let phone = phones
                    .into_iter()
                    .next()
                    .ok_or(Error::NoSupportedUpgradePath)?;
                duo.prompt(&mut session, &phone.key).await?;
                duo.wait_for_push_acknowledgement(&session).await?;
                duo.exit(&session, &phone.key).await?;

                // Completion is not reliably signaled by the exit call's own
                // status; introspect is the authoritative check.
                let finished = idx.introspect(state_token).await?;
                let target = finished
                    .success
                    .map(|success| success.href)
                    .unwrap_or_else(|| self.app_link.to_string());
                self.fetch_assertion(&target).await
            }
        }
    }

    /// Legacy single-POST authn with the Duo web factor challenge.
    async fn legacy_login(
        &self,
        credentials: &Credentials,
        factor: &DuoFactor,
    ) -> Result<SamlResponse> {
        let authn =
            authn::verify_credentials(self.http_client, self.base_uri, credentials).await?;

        match authn.status.as_str() {
            "SUCCESS" => {
                let session_token = authn
                    .session_token
                    .ok_or_else(|| Error::malformed("/api/v1/authn", "missing sessionToken"))?;
                self.fetch_assertion_with_session(&session_token).await
            }
            "MFA_REQUIRED" => {
                let duo_factor = authn
                    .embedded
                    .factors
                    .iter()
                    .find(|candidate| candidate.is_duo_web())
                    .ok_or(Error::NoSupportedUpgradePath)?;
                let verify_url = duo_factor.verify_url().ok_or_else(|| {
                    Error::malformed("/api/v1/authn", "factor without verify link")
                })?;

                let challenge =
                    authn::challenge_factor(self.http_client, verify_url, &authn.state_token)
                        .await?;
                let state_token = if challenge.state_token.is_empty() {
                    authn.state_token.clone()
                } else {
                    challenge.state_token.clone()
                };
                let verification = challenge.verification()?;
                let signed_token = SignedToken::parse(&verification.signature)?;
                let complete_url = verification.complete_url()?.to_string();

                let duo = DuoIframeClient::new(self.http_client, &verification.host);
                let cookie = duo.approve(&signed_token, &complete_url, factor).await?;
                let sig_response = signed_token.sig_response(&cookie);

                let completed = authn::complete_factor(
                    self.http_client,
                    &complete_url,
                    &state_token,
                    &sig_response,
                )
                .await?;
                let session_token = completed
                    .session_token
                    .ok_or_else(|| Error::malformed("factor complete", "missing sessionToken"))?;
                self.fetch_assertion_with_session(&session_token).await
            }
            other => Err(Error::malformed(
                "/api/v1/authn",
                format!("unexpected status {}", other),
            )),
        }
    }

    async fn complete_callback(
        &self,
        upgrade: &IframeUpgrade,
        state_handle: &str,
        sig_response: &str,
    ) -> Result<()> {
        let fields = [("sig_response", sig_response), ("stateToken", state_handle)];
        let request = if upgrade.callback_method == "GET" {
            self.http_client.get(&upgrade.callback_href).query(&fields)
        } else {
            self.http_client.post(&upgrade.callback_href).form(&fields)
        };
        let response = request.send().await?;
        Error::check_status("duo callback", response.status())?;
        Ok(())
    }

    /// Fetches a page expected to carry the assertion form.
    ///
    /// The continuation endpoint is known to return HTTP 500 once on an
    /// otherwise-complete login; the original entry request is re-issued
    /// exactly once before giving up. Not a general retry policy.
    async fn fetch_assertion(&self, url: &str) -> Result<SamlResponse> {
        let mut response = self.http_client.get(url).send().await?;
        if response.status().is_server_error() {
            log::debug!(
                "{} returned {}, retrying the entry request once",
                url,
                response.status()
            );
            response = self.http_client.get(self.app_link).send().await?;
        }
        Error::check_status("app entry", response.status())?;
        let body = response.text().await?;
        extract_saml_response(&body)
    }

    async fn create_session(&self, session_token: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct CreateSessionResponse {
            id: String,
        }

        let uri = format!("{}/api/v1/sessions", self.base_uri);
        let response = self
            .http_client
            .post(&uri)
            .json(&serde_json::json!({ "sessionToken": session_token }))
            .send()
            .await?;
        Error::check_status("/api/v1/sessions", response.status())?;
        let resp: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| Error::malformed("/api/v1/sessions", e.to_string()))?;
        Ok(resp.id)
    }

    async fn fetch_assertion_with_session(&self, session_token: &str) -> Result<SamlResponse> {
        let session_id = self.create_session(session_token).await?;
        let response = self
            .http_client
            .get(self.app_link)
            .header("Cookie", format!("sid={}", session_id))
            .send()
            .await?;
        Error::check_status("app entry", response.status())?;
        let body = response.text().await?;
        extract_saml_response(&body)
    }
}

/// Scrapes the state token out of the entry page's inline script.
///
/// Okta escapes hyphens as `\x2D` inside the script literal.
fn extract_state_token(body: &str) -> Option<String> {
    let re = Regex::new(r"var stateToken = '([^']+)'").unwrap();
    let token = re.captures(body)?.get(1)?.as_str();
    Some(token.replace("\\x2D", "-"))
}

fn extract_saml_response(body: &str) -> Result<SamlResponse> {
    let form = find_form_by_id(body, "appForm")
        .or_else(|| find_first_form(body))
        .ok_or(Error::NoSamlAssertion)?;
    let encoded = form
        .fields
        .get("SAMLResponse")
        .filter(|value| !value.is_empty())
        .ok_or(Error::NoSamlAssertion)?;
    SamlResponse::parse(encoded)
}
