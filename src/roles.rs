use crate::error::{Error, Result};

/// The resolved target of a login: the two ARNs an
/// `AssumeRoleWithSAML`-style exchange needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProviderPair {
    pub role_arn: String,
    pub provider_arn: String,
}

const PROVIDER_MARKER: &str = "saml-provider/";
// AWS uses role/, Tencent-style federation uses roleName/.
const ROLE_MARKERS: [&str; 2] = ["role/", "roleName/"];

/// Splits one attribute value into a classified pair.
///
/// The ARN order within the value varies by issuer, so each half is
/// classified by its marker substring rather than by position.
fn split_pair(value: &str) -> Option<RoleProviderPair> {
    let (first, second) = value.split_once(',')?;
    let (first, second) = (first.trim(), second.trim());
    if first.contains(PROVIDER_MARKER) {
        Some(RoleProviderPair {
            provider_arn: first.to_string(),
            role_arn: second.to_string(),
        })
    } else if second.contains(PROVIDER_MARKER) {
        Some(RoleProviderPair {
            provider_arn: second.to_string(),
            role_arn: first.to_string(),
        })
    } else {
        None
    }
}

fn role_basename(role_arn: &str) -> Option<&str> {
    ROLE_MARKERS.iter().find_map(|marker| {
        role_arn
            .find(marker)
            .map(|index| &role_arn[index + marker.len()..])
    })
}

/// All classified pairs, in attribute order. Used for interactive
/// selection when no role name was requested.
pub fn list_pairs(values: &[String]) -> Vec<RoleProviderPair> {
    values.iter().filter_map(|v| split_pair(v)).collect()
}

/// Resolves a requested role name against the assertion's role attribute
/// values.
///
/// An empty `role_name` with exactly one attribute value returns that pair
/// as-is: old clients always took the first two ARNs of a single-statement
/// assertion, and that shape still has to work.
///
/// On duplicate case-insensitive names the last entry wins; the scan does
/// not short-circuit. Legacy behavior, kept on purpose.
pub fn resolve_role(role_name: &str, values: &[String]) -> Result<RoleProviderPair> {
    if role_name.is_empty() && values.len() == 1 {
        return split_pair(&values[0]).ok_or(Error::NoEntitlements);
    }

    let pairs: Vec<RoleProviderPair> = values.iter().filter_map(|v| split_pair(v)).collect();
    if pairs.is_empty() {
        return Err(Error::NoEntitlements);
    }

    let mut selected = None;
    for pair in pairs {
        if let Some(name) = role_basename(&pair.role_arn) {
            if name.eq_ignore_ascii_case(role_name) {
                selected = Some(pair);
            }
        }
    }

    selected.ok_or_else(|| Error::RoleNotFound {
        name: role_name.to_string(),
    })
}
