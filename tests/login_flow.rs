//! End-to-end login flows against a fixture identity provider and Duo.
//!
//! Both services are mocked on one wiremock server; the tests assert which
//! generation of the Duo protocol a login routes through, and that the
//! protocol quirks (two-phase status poll, result_url hop, 500-after-exit
//! retry) behave as the real services do.

use cloudkey::authn::Credentials;
use cloudkey::duo::DuoFactor;
use cloudkey::error::Error;
use cloudkey::http_client::create_login_client;
use cloudkey::okta::Okta;
use cloudkey::roles::resolve_role;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP_PATH: &str = "/home/amazon_aws/0oa1/137";

fn credentials() -> Credentials {
    Credentials {
        username: "user@example.com".into(),
        password: "hunter2".into(),
    }
}

fn saml_assertion_b64() -> String {
    base64::encode(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol">
  <saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion">
    <saml2:AttributeStatement>
      <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">
        <saml2:AttributeValue>arn:aws:iam::1:saml-provider/Okta,arn:aws:iam::1:role/Admin</saml2:AttributeValue>
        <saml2:AttributeValue>arn:aws:iam::1:saml-provider/Okta,arn:aws:iam::1:role/Power</saml2:AttributeValue>
      </saml2:Attribute>
    </saml2:AttributeStatement>
  </saml2:Assertion>
</saml2p:Response>"#,
    )
}

/// The SP-initiated entry page, state token escaped the way the provider
/// escapes it.
fn entry_page() -> String {
    r#"<html><script>var stateToken = '00entry\x2Dtoken';</script></html>"#.to_string()
}

fn app_form_page(assertion: &str) -> String {
    format!(
        r#"<html><body><form id="appForm" method="POST" action="https://signin.aws.amazon.com/saml">
            <input type="hidden" name="SAMLResponse" value="{}"/>
        </form></body></html>"#,
        assertion
    )
}

async fn mount_entry_then_app_form(server: &MockServer, assertion: &str) {
    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(entry_page()))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(app_form_page(assertion)))
        .mount(server)
        .await;
}

async fn mount_introspect(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stateHandle": "02handle",
            "remediation": {"value": []}
        })))
        .mount(server)
        .await;
}

/// Classic selection: a challenge remediation plus an enrolled duo
/// authenticator carrying the signed token and host.
async fn mount_identify_classic(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stateHandle": "02handle",
            "remediation": {"value": [
                {"name": "challenge-authenticator",
                 "href": format!("{}/idp/idx/challenge/answer", server.uri()),
                 "method": "POST"}
            ]},
            "currentAuthenticatorEnrollment": {"value": {
                "key": "duo",
                "contextualData": {
                    "host": server.uri(),
                    "signedToken": "TX|abc:APP|def"
                }
            }}
        })))
        .mount(server)
        .await;
}

/// Classic Duo endpoints: auth frame with the scraped sid, prompt, the
/// two-phase status poll, and the extra result_url hop for the cookie.
async fn mount_duo_classic(server: &MockServer, second_status: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/frame/web/v1/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            // quoting intentionally mixed; deployments disagree
            r#"<html><form method=POST><input type=hidden name=sid value='sid-123'></form></html>"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK", "response": {"txid": "txid-1"}
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK", "response": {"status_code": "pushed"}
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(second_status))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/status/txid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK", "response": {"status_code": "allow", "result": "SUCCESS",
                                        "cookie": "AUTH|cookie"}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/challenge/answer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn classic_enrollment_routes_through_iframe_flow() {
    let server = MockServer::start().await;
    let assertion = saml_assertion_b64();

    mount_entry_then_app_form(&server, &assertion).await;
    mount_introspect(&server).await;
    mount_identify_classic(&server).await;
    mount_duo_classic(
        &server,
        json!({"stat": "OK", "response": {"status_code": "allow", "result": "SUCCESS",
                                           "result_url": "/frame/status/txid-1"}}),
    )
    .await;

    // The frameless generation must not be touched.
    Mock::given(method("POST"))
        .and(path("/frame/v4/prompt"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let response = okta
        .get_saml_assertion(&credentials(), &DuoFactor::Push)
        .await
        .unwrap();

    assert_eq!(response.raw(), assertion);
    let pair = resolve_role("Power", &response.role_attribute_values()).unwrap();
    assert_eq!(pair.role_arn, "arn:aws:iam::1:role/Power");
}

#[tokio::test]
async fn duo_denial_surfaces_mfa_not_allowed() {
    let server = MockServer::start().await;

    mount_entry_then_app_form(&server, &saml_assertion_b64()).await;
    mount_introspect(&server).await;
    mount_identify_classic(&server).await;
    // Push delivered, then denied on the blocking poll.
    mount_duo_classic(
        &server,
        json!({"stat": "OK", "response": {"status_code": "deny", "result": "FAILURE"}}),
    )
    .await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let result = okta.get_saml_assertion(&credentials(), &DuoFactor::Push).await;
    assert!(
        matches!(result, Err(Error::MfaNotAllowed(_))),
        "denial must be MfaNotAllowed, not a transport error"
    );
}

/// Frameless selection: an `OIDC` remediation wins, and the login walks the
/// hidden-form chain into the `/frame/v4/*` endpoints.
async fn mount_frameless_fixture(server: &MockServer, success_status: u16, assertion: &str) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stateHandle": "02handle",
            "remediation": {"value": []}
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stateHandle": "02handle",
            "success": {"name": "success-redirect",
                        "href": format!("{}/app/success", server.uri())}
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/idp/idx/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stateHandle": "02handle",
            "remediation": {"value": [
                {"name": "redirect-idp", "type": "OIDC",
                 "href": format!("{}/oauth2/authorize", server.uri())}
            ]}
        })))
        .mount(server)
        .await;

    // Two hidden-form hops before the sid/_xsrf page.
    Mock::given(method("GET"))
        .and(path("/oauth2/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<form method="POST" action="{}/duo/entry">
                <input type="hidden" name="xsrf_token" value="x1">
            </form>"#,
            server.uri()
        )))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/duo/entry"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form method="POST" action="/duo/prompt">
                <input type="hidden" name="sid" value="sid-9">
                <input type="hidden" name="_xsrf" value="xsrf-9">
            </form>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/frame/v4/auth/prompt/data"))
        .and(query_param("post_auth_action", "OIDC_EXIT"))
        .and(query_param("sid", "sid-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK",
            "response": {"phones": [{"name": "phone1", "key": "DPHONE1"},
                                     {"name": "phone2", "key": "DPHONE2"}]}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/v4/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK", "response": {"txid": "txid-9"}
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/v4/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK", "response": {"status_code": "pushed"}
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/v4/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK", "response": {"status_code": "allow", "result": "SUCCESS"}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/frame/v4/oidc/exit"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/app/success"))
        .respond_with(match success_status {
            200 => ResponseTemplate::new(200).set_body_string(app_form_page(assertion)),
            status => ResponseTemplate::new(status),
        })
        .mount(server)
        .await;
}

#[tokio::test]
async fn oidc_remediation_routes_through_frameless_flow() {
    let server = MockServer::start().await;
    let assertion = saml_assertion_b64();

    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(entry_page()))
        .mount(&server)
        .await;
    mount_frameless_fixture(&server, 200, &assertion).await;

    // The classic generation must not be touched.
    Mock::given(method("POST"))
        .and(path("/frame/prompt"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let response = okta
        .get_saml_assertion(&credentials(), &DuoFactor::Push)
        .await
        .unwrap();
    assert_eq!(response.raw(), assertion);
}

#[tokio::test]
async fn spurious_500_after_exit_is_retried_once() {
    let server = MockServer::start().await;
    let assertion = saml_assertion_b64();

    // Continuation endpoint 500s even though the login is complete; the
    // entry URL now serves the assertion and must be retried exactly once.
    mount_entry_then_app_form(&server, &assertion).await;
    mount_frameless_fixture(&server, 500, &assertion).await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let response = okta
        .get_saml_assertion(&credentials(), &DuoFactor::Push)
        .await
        .unwrap();
    assert_eq!(response.raw(), assertion);
}

#[tokio::test]
async fn second_500_is_upstream_internal() {
    let server = MockServer::start().await;
    let assertion = saml_assertion_b64();

    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(entry_page()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_frameless_fixture(&server, 500, &assertion).await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let result = okta.get_saml_assertion(&credentials(), &DuoFactor::Push).await;
    assert!(matches!(result, Err(Error::UpstreamInternal(_))));
}

#[tokio::test]
async fn no_usable_remediation_fails_closed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(entry_page()))
        .mount(&server)
        .await;
    mount_introspect(&server).await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stateHandle": "02handle",
            "remediation": {"value": [{"name": "enroll-profile"}]}
        })))
        .mount(&server)
        .await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let result = okta.get_saml_assertion(&credentials(), &DuoFactor::Push).await;
    assert!(matches!(result, Err(Error::NoSupportedUpgradePath)));
}

/// An entry page with no embedded state token drops to the legacy authn
/// flow; with no MFA required the session cookie alone fetches the form.
#[tokio::test]
async fn legacy_flow_without_mfa() {
    let server = MockServer::start().await;
    let assertion = saml_assertion_b64();

    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html>sign-in form, no token</html>"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(app_form_page(&assertion)))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "sessionToken": "session-token-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sid-cookie"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let response = okta
        .get_saml_assertion(&credentials(), &DuoFactor::Push)
        .await
        .unwrap();
    assert_eq!(response.raw(), assertion);
}

#[tokio::test]
async fn bad_password_is_authentication_failed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(APP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>no token</html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorSummary": "Authentication failed"
        })))
        .mount(&server)
        .await;

    let client = create_login_client().unwrap();
    let base_uri = server.uri();
    let app_link = format!("{}{}", base_uri, APP_PATH);
    let okta = Okta {
        http_client: &client,
        base_uri: &base_uri,
        app_link: &app_link,
    };

    let result = okta.get_saml_assertion(&credentials(), &DuoFactor::Push).await;
    assert!(matches!(result, Err(Error::AuthenticationFailed)));
}
