use std::collections::HashMap;

use crate::authn::Credentials;
use crate::duo::DuoFactor;
use crate::error::Result;
use crate::http_client;
use crate::okta::Okta;
use crate::saml::SamlResponse;

/// Identity providers this build can drive, as a closed set.
#[derive(Debug)]
pub enum Provider {
    Okta { base_uri: String },
}

impl Provider {
    /// One complete login. A fresh cookie-jar client is created here so
    /// sessions never leak between attempts.
    pub async fn get_saml_assertion(
        &self,
        credentials: &Credentials,
        app_link: &str,
        factor: &DuoFactor,
    ) -> Result<SamlResponse> {
        match self {
            Provider::Okta { base_uri } => {
                let client = http_client::create_login_client()?;
                let okta = Okta {
                    http_client: &client,
                    base_uri,
                    app_link,
                };
                okta.get_saml_assertion(credentials, factor).await
            }
        }
    }
}

/// Explicit registry, constructed at startup and passed by reference.
/// Nothing here is process-global or mutable after construction.
pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
}

impl ProviderRegistry {
    pub fn new(okta_base_uri: &str) -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "okta".to_string(),
            Provider::Okta {
                base_uri: okta_base_uri.to_string(),
            },
        );
        ProviderRegistry { providers }
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }
}
