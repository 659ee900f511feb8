// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Decoded query string.
///
/// Presence and value are kept apart: `?test` is present with an empty value,
/// which is not the same as absent.
#[derive(Debug, Clone, Default)]
pub struct Params(pub(crate) Vec<(String, String)>);

impl Params {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
        Self(pairs)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// First value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_without_value() {
        let params = Params::parse(Some("v6&codec=u6&vcode=0&codec=u8"));
        assert!(params.has("v6"));
        assert_eq!(params.get("v6"), Some(""));
        assert_eq!(params.get("codec"), Some("u6"));
        assert_eq!(params.get("vcode"), Some("0"));
        assert!(!params.has("asn"));
        assert_eq!(params.get("asn"), None);
    }

    #[test]
    fn empty_query() {
        assert!(!Params::parse(None).has(""));
        assert!(!Params::parse(Some("")).has("test"));
    }
}
