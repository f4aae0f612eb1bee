use roxmltree::Document;

use crate::error::{Error, Result};

pub const AWS_ROLE_URN: &str = "https://aws.amazon.com/SAML/Attributes/Role";
pub const TENCENT_ROLE_URN: &str = "https://cloud.tencent.com/SAML/Attributes/Role";

/// A decoded SAML response.
///
/// The original base64 text is retained verbatim and is the only form ever
/// transmitted onward: the assertion is signed over the exact bytes the
/// identity provider produced, and a parse/re-serialize round trip does not
/// preserve whitespace or attribute order.
pub struct SamlResponse {
    raw: String,
    xml: String,
}

impl SamlResponse {
    pub fn parse(base64_text: &str) -> Result<SamlResponse> {
        let bytes = base64::decode(base64_text)
            .map_err(|e| Error::MalformedAssertion(e.to_string()))?;
        let xml = String::from_utf8(bytes).map_err(|e| Error::MalformedAssertion(e.to_string()))?;
        // Reject unparsable XML at the boundary; later reads assume it.
        Document::parse(&xml).map_err(|e| Error::MalformedAssertion(e.to_string()))?;
        Ok(SamlResponse {
            raw: base64_text.to_string(),
            xml,
        })
    }

    /// The untouched base64 original.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Every value posted under the given attribute URN, in document order.
    pub fn attribute_values(&self, urn: &str) -> Vec<String> {
        // The document borrows from the backing string, so it is re-parsed
        // here rather than stored; this runs once per login.
        let doc = match Document::parse(&self.xml) {
            Ok(doc) => doc,
            Err(_) => return Vec::new(),
        };
        doc.descendants()
            .filter(|node| node.attribute("Name") == Some(urn))
            .flat_map(|attribute| attribute.children())
            .filter_map(|child| child.text())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// Role attribute values for whichever cloud URN the assertion carries.
    pub fn role_attribute_values(&self) -> Vec<String> {
        let values = self.attribute_values(AWS_ROLE_URN);
        if !values.is_empty() {
            return values;
        }
        self.attribute_values(TENCENT_ROLE_URN)
    }
}
