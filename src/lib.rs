//! Federated login engine: username/password in, short-lived cloud
//! credentials out, by way of an identity provider and Duo step-up MFA.

pub mod authn;
pub mod duo;
pub mod error;
pub mod html_form;
pub mod http_client;
pub mod idx;
pub mod okta;
pub mod provider;
pub mod roles;
pub mod saml;
pub mod sts;
pub mod ui;
pub mod upgrade;

pub use authn::Credentials;
pub use error::{Error, Result};
pub use okta::Okta;
pub use roles::{resolve_role, RoleProviderPair};
pub use saml::SamlResponse;
