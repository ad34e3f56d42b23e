use modmirror_core::Config;
use url::Url;

/// Hosts this process is allowed to download from.
///
/// User-declared URLs must start with one of `prefixes`. Anything under the
/// mirror's own public base is always allowed. An empty whitelist permits no
/// direct URLs at all.
#[derive(Debug, Clone, Default)]
pub struct ServerWhitelist {
    prefixes: Vec<String>,
    mirror_base: Option<Url>,
}

impl ServerWhitelist {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.trim().is_empty())
                .collect(),
            mirror_base: None,
        }
    }

    pub fn with_mirror_base(mut self, base: Url) -> Self {
        self.mirror_base = Some(base);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let whitelist = Self::new(config.download_whitelist.iter().cloned());
        match &config.mirror.public_base_url {
            Some(base) => whitelist.with_mirror_base(base.clone()),
            None => whitelist,
        }
    }

    pub fn allows_url(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.prefixes.iter().any(|prefix| url.starts_with(prefix.as_str()))
    }

    pub fn allows_mirror_url(&self, url: &Url) -> bool {
        self.mirror_base
            .as_ref()
            .is_some_and(|base| url.as_str().starts_with(base.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match() {
        let whitelist = ServerWhitelist::new(["https://files.example.com/"]);
        assert!(whitelist.allows_url(&Url::parse("https://files.example.com/a.zip").unwrap()));
        assert!(!whitelist.allows_url(&Url::parse("https://evil.example.com/a.zip").unwrap()));
    }

    #[test]
    fn empty_whitelist_denies() {
        let whitelist = ServerWhitelist::new(Vec::<String>::new());
        assert!(!whitelist.allows_url(&Url::parse("https://host/a.zip").unwrap()));
    }

    #[test]
    fn mirror_urls_need_mirror_base() {
        let url = Url::parse("https://cdn.example.com/mods/a.zip").unwrap();
        assert!(!ServerWhitelist::default().allows_mirror_url(&url));
        let whitelist = ServerWhitelist::default()
            .with_mirror_base(Url::parse("https://cdn.example.com/mods/").unwrap());
        assert!(whitelist.allows_mirror_url(&url));
        assert!(!whitelist.allows_url(&url));
    }
}
