use std::collections::HashMap;
use std::env;
use std::path::Path;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use url::Url;

use cloudkey::authn::Credentials;
use cloudkey::duo::DuoFactor;
use cloudkey::provider::ProviderRegistry;
use cloudkey::roles;
use cloudkey::sts::{CloudProvider, StsCredentials};
use cloudkey::ui;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let requested_role = args.get(1).map(String::as_str).unwrap_or("");

    let settings = load_settings()?;
    let app_link = settings
        .get("app-link")
        .context("app-link missing from settings")?;
    log::debug!("app_link: {}", app_link);

    let parsed_url = Url::parse(app_link)?;
    let base_uri = format!(
        "{}://{}",
        parsed_url.scheme(),
        parsed_url.host_str().context("app-link has no host")?
    );
    log::debug!("idp base uri: {}", base_uri);

    let registry = ProviderRegistry::new(&base_uri);
    let idp_name = settings
        .get("identity-provider")
        .map(String::as_str)
        .unwrap_or("okta");
    let provider = registry
        .get(idp_name)
        .with_context(|| format!("unknown identity provider: {}", idp_name))?;

    let credentials = Credentials {
        username: ui::read_from_stdin("Username"),
        password: ui::read_password_from_stdin("Password"),
    };
    let factor = match settings.get("duo-factor").map(String::as_str) {
        Some("passcode") => DuoFactor::Passcode(ui::read_passcode_from_stdin()),
        _ => DuoFactor::Push,
    };

    let assertion = provider
        .get_saml_assertion(&credentials, app_link, &factor)
        .await?;

    let values = assertion.role_attribute_values();
    let pair = if requested_role.is_empty() && values.len() > 1 {
        let pairs = roles::list_pairs(&values);
        if pairs.is_empty() {
            return Err(cloudkey::Error::NoEntitlements.into());
        }
        ui::pick_role(&pairs).clone()
    } else {
        roles::resolve_role(requested_role, &values)?
    };
    log::debug!("resolved role: {}", pair.role_arn);

    let ttl: i32 = settings
        .get("session-duration")
        .and_then(|value| value.parse().ok())
        .unwrap_or(3600);
    let cloud = match settings.get("cloud").map(String::as_str) {
        Some("tencent") => CloudProvider::Tencent {
            region: settings.get("region").cloned().unwrap_or_default(),
        },
        _ => CloudProvider::Aws,
    };

    let sts_credentials = cloud.exchange(&pair, assertion.raw(), ttl).await?;
    write_credentials(&sts_credentials).await?;

    Ok(())
}

fn load_settings() -> anyhow::Result<HashMap<String, String>> {
    let mut settings = config::Config::default();

    let local_config_path = Path::new(".cloudkey.toml").to_path_buf();

    let home = env::var("HOME").context("HOME is not set")?;
    let global_config_path = Path::new(&home).join(".cloudkey.toml");

    let config_path = if local_config_path.is_file() {
        local_config_path
    } else if global_config_path.is_file() {
        global_config_path
    } else {
        anyhow::bail!("no .cloudkey.toml found in the working directory or home");
    };

    settings.merge(config::File::with_name(
        config_path.to_str().context("config path is not valid UTF-8")?,
    ))?;

    Ok(settings.try_into::<HashMap<String, String>>()?)
}

async fn write_credentials(credentials: &StsCredentials) -> anyhow::Result<()> {
    let credentials_file_content = format!(
        r#"
[default]
aws_access_key_id = {}
aws_secret_access_key = {}
aws_session_token = {}
expiration = {}
"#,
        credentials.access_key_id,
        credentials.secret_access_key,
        credentials.session_token,
        credentials.expiration
    );

    println!("{}", credentials_file_content);

    let home = env::var("HOME").context("HOME is not set")?;
    tokio::fs::create_dir_all(format!("{}/.aws", home)).await?;

    let mut file = tokio::fs::File::create(format!("{}/.aws/credentials", home)).await?;
    file.write_all(credentials_file_content.as_bytes()).await?;
    Ok(())
}
