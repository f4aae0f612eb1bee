use anyhow::Context;
use aws_smithy_types::date_time::Format;
use serde::Deserialize;

use crate::http_client;
use crate::roles::RoleProviderPair;

/// Short-lived credentials from an `AssumeRoleWithSAML`-style exchange.
#[derive(Debug)]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
}

/// Where the assertion is exchanged. A single stateless call per variant.
pub enum CloudProvider {
    Aws,
    Tencent { region: String },
}

impl CloudProvider {
    pub async fn exchange(
        &self,
        pair: &RoleProviderPair,
        assertion_base64: &str,
        ttl_seconds: i32,
    ) -> anyhow::Result<StsCredentials> {
        match self {
            CloudProvider::Aws => exchange_aws(pair, assertion_base64, ttl_seconds).await,
            CloudProvider::Tencent { region } => {
                exchange_tencent(region, pair, assertion_base64, ttl_seconds).await
            }
        }
    }
}

async fn exchange_aws(
    pair: &RoleProviderPair,
    assertion_base64: &str,
    ttl_seconds: i32,
) -> anyhow::Result<StsCredentials> {
    // AssumeRoleWithSAML is unsigned; the assertion is the credential.
    let config = aws_config::from_env().no_credentials().load().await;
    let client = aws_sdk_sts::Client::new(&config);

    let result = client
        .assume_role_with_saml()
        .role_arn(&pair.role_arn)
        .principal_arn(&pair.provider_arn)
        .saml_assertion(assertion_base64)
        .duration_seconds(ttl_seconds)
        .send()
        .await?;

    let credentials = result
        .credentials()
        .context("AssumeRoleWithSAML returned no credentials")?;
    Ok(StsCredentials {
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: credentials.secret_access_key().to_string(),
        session_token: credentials.session_token().to_string(),
        expiration: credentials.expiration().fmt(Format::DateTime)?,
    })
}

#[derive(Deserialize, Debug)]
struct TencentResponseWrapper {
    #[serde(rename = "Response")]
    response: TencentResponse,
}

#[derive(Deserialize, Debug)]
struct TencentResponse {
    #[serde(rename = "Credentials")]
    credentials: Option<TencentCredentials>,
    #[serde(rename = "Expiration", default)]
    expiration: String,
    #[serde(rename = "Error")]
    error: Option<TencentError>,
}

#[derive(Deserialize, Debug)]
struct TencentCredentials {
    #[serde(rename = "TmpSecretId")]
    tmp_secret_id: String,
    #[serde(rename = "TmpSecretKey")]
    tmp_secret_key: String,
    #[serde(rename = "Token")]
    token: String,
}

#[derive(Deserialize, Debug)]
struct TencentError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
}

async fn exchange_tencent(
    region: &str,
    pair: &RoleProviderPair,
    assertion_base64: &str,
    ttl_seconds: i32,
) -> anyhow::Result<StsCredentials> {
    let ttl = ttl_seconds.to_string();
    let client = http_client::create_http_client();
    let resp: TencentResponseWrapper = client
        .get("https://sts.tencentcloudapi.com")
        .query(&[
            ("Action", "AssumeRoleWithSAML"),
            ("Version", "2018-08-13"),
            ("Region", region),
            ("RoleArn", &pair.role_arn),
            ("PrincipalArn", &pair.provider_arn),
            ("SAMLAssertion", assertion_base64),
            ("RoleSessionName", "cloudkey"),
            ("DurationSeconds", &ttl),
        ])
        .header("Accept", "application/json")
        .send()
        .await?
        .json()
        .await?;

    if let Some(error) = resp.response.error {
        anyhow::bail!("AssumeRoleWithSAML failed: {} ({})", error.message, error.code);
    }
    let credentials = resp
        .response
        .credentials
        .context("AssumeRoleWithSAML returned no credentials")?;
    Ok(StsCredentials {
        access_key_id: credentials.tmp_secret_id,
        secret_access_key: credentials.tmp_secret_key,
        session_token: credentials.token,
        expiration: resp.response.expiration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tencent_envelope_decodes() {
        let body = r#"{"Response": {
            "Credentials": {"TmpSecretId": "id", "TmpSecretKey": "key", "Token": "tok"},
            "Expiration": "2026-01-01T00:00:00Z",
            "ExpiredTime": 1767225600,
            "RequestId": "req"
        }}"#;
        let wrapper: TencentResponseWrapper = serde_json::from_str(body).unwrap();
        let credentials = wrapper.response.credentials.unwrap();
        assert_eq!(credentials.tmp_secret_id, "id");
        assert_eq!(wrapper.response.expiration, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn tencent_error_envelope_decodes() {
        let body = r#"{"Response": {"Error": {"Code": "InvalidParameter", "Message": "bad arn"},
                        "RequestId": "req"}}"#;
        let wrapper: TencentResponseWrapper = serde_json::from_str(body).unwrap();
        let error = wrapper.response.error.unwrap();
        assert_eq!(error.code, "InvalidParameter");
        assert_eq!(error.message, "bad arn");
    }
}
