use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Login artifact captured out of band for one service: the request body and
/// headers a login helper observed. Stored only in the credential vault.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoginArtifact {
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl LoginArtifact {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Headers whose name starts with `x-`, compared case-insensitively.
    pub fn extension_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(k, _)| k.to_ascii_lowercase().starts_with("x-"))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Debug for LoginArtifact {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LoginArtifact")
            .field("body", &"<redacted>")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_leak_body() {
        let artifact = LoginArtifact::new("secret-password").with_header("x-token", "t");
        let debug = format!("{:?}", artifact);
        assert!(!debug.contains("secret-password"));
        assert!(!debug.contains("\"t\""));
    }

    #[test]
    fn extension_headers_filter_case_insensitive() {
        let artifact = LoginArtifact::new("{}")
            .with_header("X-Src-Fp", "1")
            .with_header("x-platform", "2")
            .with_header("Cookie", "3");
        let names: Vec<_> = artifact.extension_headers().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["X-Src-Fp", "x-platform"]);
    }
}
