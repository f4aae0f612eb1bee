use std::collections::HashMap;

use scraper::{Html, Selector};

/// One HTML `<form>`, reduced to what the login flows need: its method,
/// its action, and every nested input's name/value pair.
#[derive(Debug, Clone, Default)]
pub struct Form {
    pub method: String,
    pub action: String,
    pub fields: HashMap<String, String>,
}

/// Returns the first `<form>` in document order, or `None`.
///
/// Absence is a normal result here; callers map it to their own failure
/// (`NoSamlAssertion`, `NoDuoForm`).
pub fn find_first_form(document: &str) -> Option<Form> {
    find_form(document, None)
}

/// Returns the first `<form>` whose `id` attribute matches, or `None`.
pub fn find_form_by_id(document: &str, id: &str) -> Option<Form> {
    find_form(document, Some(id))
}

fn find_form(document: &str, id: Option<&str>) -> Option<Form> {
    let html = Html::parse_document(document);
    let form_selector = Selector::parse("form").unwrap();
    let input_selector = Selector::parse("input").unwrap();

    let form = html.select(&form_selector).find(|form| match id {
        Some(id) => form.value().attr("id") == Some(id),
        None => true,
    })?;

    let mut fields = HashMap::new();
    for input in form.select(&input_selector) {
        if let Some(name) = input.value().attr("name") {
            // Last write wins on duplicate names.
            let value = input.value().attr("value").unwrap_or("");
            fields.insert(name.to_string(), value.to_string());
        }
    }

    Some(Form {
        method: form
            .value()
            .attr("method")
            .unwrap_or("GET")
            .to_ascii_uppercase(),
        action: form.value().attr("action").unwrap_or("").to_string(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sid_under_every_quoting_style() {
        // Duo deployments are inconsistent about attribute quoting.
        let fixtures = [
            r#"<form><input name="sid" value="foo"></form>"#,
            r#"<form><input name='sid' value='foo'></form>"#,
            r#"<form><input name=sid value=foo></form>"#,
            r#"<form><input name="sid" value='foo'></form>"#,
            r#"<form><input name='sid' value="foo"></form>"#,
            r#"<form><input name=sid value="foo"></form>"#,
            r#"<form><input name=sid value='foo'></form>"#,
            r#"<form><input name="sid" value=foo></form>"#,
            r#"<form><input name='sid' value=foo></form>"#,
            r#"<form><input type="hidden" name="sid" value="foo"/></form>"#,
        ];
        for fixture in fixtures {
            let form = find_first_form(fixture).unwrap();
            assert_eq!(form.fields.get("sid").map(String::as_str), Some("foo"), "{}", fixture);
        }
    }

    #[test]
    fn decodes_entity_escaped_values() {
        let form =
            find_first_form(r#"<form><input name="sid" value="a&amp;b=c"></form>"#).unwrap();
        assert_eq!(form.fields["sid"], "a&b=c");
    }

    #[test]
    fn last_write_wins_on_duplicate_names() {
        let html = r#"<form>
            <input name="tx" value="first">
            <input name="tx" value="second">
        </form>"#;
        let form = find_first_form(html).unwrap();
        assert_eq!(form.fields["tx"], "second");
    }

    #[test]
    fn finds_form_by_id() {
        let html = r#"
            <form id="other"><input name="a" value="1"></form>
            <form id="appForm" method="post" action="/sso/saml">
                <input name="SAMLResponse" value="abc">
            </form>"#;
        let form = find_form_by_id(html, "appForm").unwrap();
        assert_eq!(form.method, "POST");
        assert_eq!(form.action, "/sso/saml");
        assert_eq!(form.fields["SAMLResponse"], "abc");
        assert!(find_form_by_id(html, "missing").is_none());
    }

    #[test]
    fn missing_form_is_none_not_error() {
        assert!(find_first_form("<html><body><p>nothing here</p></body></html>").is_none());
    }

    #[test]
    fn collects_nested_inputs() {
        let html = r#"<form method="POST">
            <div><fieldset><input name="sid" value="deep"></fieldset></div>
            <input name="_xsrf" value="tok">
        </form>"#;
        let form = find_first_form(html).unwrap();
        assert_eq!(form.fields["sid"], "deep");
        assert_eq!(form.fields["_xsrf"], "tok");
    }
}
