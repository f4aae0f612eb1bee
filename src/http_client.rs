use crate::error::Result;

/// Client for one login attempt.
///
/// Each login owns its cookie jar: correctness of the flow depends on every
/// request seeing the session cookies of the previous one, and sessions must
/// never leak between concurrent logins.
pub fn create_login_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > 5 {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        }))
        .build()?;
    Ok(client)
}

/// Plain stateless client for calls that carry no session.
pub fn create_http_client() -> reqwest::Client {
    reqwest::Client::new()
}
