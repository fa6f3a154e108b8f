use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TagError;

pub const DEFAULT_SITE_URL: &str = "https://danbooru.donmai.us";
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_USERNAME: &str = "DANBOORU_USERNAME";
pub const ENV_API_KEY: &str = "DANBOORU_API_KEY";
pub const ENV_SITE_URL: &str = "DANBOORU_SITE_URL";
pub const ENV_CACHE_DIR: &str = "DANBOORU_CACHE_DIR";
pub const ENV_REQUEST_DELAY: &str = "DANBOORU_REQUEST_DELAY";

#[derive(Clone, Debug)]
pub struct ExpanderConfig {
    pub username: Option<String>,
    pub api_key: Option<String>,
    pub site_url: String,
    pub cache_dir: Option<PathBuf>,
    pub use_cache: bool,
    pub request_delay: Duration,
    pub timeout: Duration,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            username: None,
            api_key: None,
            site_url: DEFAULT_SITE_URL.to_string(),
            cache_dir: None,
            use_cache: true,
            request_delay: DEFAULT_REQUEST_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ExpanderConfig {
    /// Reads the `DANBOORU_*` variables after loading a `.env` file from the
    /// current directory or its parents, if there is one.
    pub fn from_env() -> Result<Self, TagError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        config.username = get(ENV_USERNAME);
        config.api_key = get(ENV_API_KEY);
        if let Some(site) = get(ENV_SITE_URL) {
            config = config.with_site_url(&site);
        }
        if let Some(dir) = get(ENV_CACHE_DIR) {
            config = config.with_cache_dir(PathBuf::from(dir));
        }
        if let Some(raw) = get(ENV_REQUEST_DELAY) {
            config.request_delay = parse_delay(&raw)?;
        }
        Ok(config)
    }

    pub fn with_site_url(mut self, site_url: &str) -> Self {
        self.site_url = normalize_site_url(site_url);
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(expand_tilde(&dir));
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.api_key.is_some()
    }

    /// Directory holding the graph cache, or `None` when caching is off.
    pub fn cache_path(&self) -> Option<&Path> {
        if !self.use_cache {
            return None;
        }
        self.cache_dir.as_deref()
    }
}

pub fn parse_delay(raw: &str) -> Result<Duration, TagError> {
    let secs: f64 = raw.trim().parse().map_err(|_| TagError::Config {
        message: format!("request delay must be a number of seconds, got {raw:?}"),
    })?;
    Duration::try_from_secs_f64(secs).map_err(|_| TagError::Config {
        message: format!("request delay must be a non-negative number of seconds, got {raw:?}"),
    })
}

pub fn normalize_site_url(site_url: &str) -> String {
    let trimmed = site_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_SITE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Replaces a leading `~` component with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{expand_tilde, normalize_site_url, parse_delay, ExpanderConfig, DEFAULT_SITE_URL};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ExpanderConfig::from_lookup(lookup(&[])).expect("should load");
        assert_eq!(config.site_url, DEFAULT_SITE_URL);
        assert_eq!(config.request_delay, Duration::from_millis(500));
        assert!(config.username.is_none());
        assert!(config.cache_path().is_none());
    }

    #[test]
    fn reads_credentials_and_cache_dir() {
        let config = ExpanderConfig::from_lookup(lookup(&[
            ("DANBOORU_USERNAME", "alice"),
            ("DANBOORU_API_KEY", "secret"),
            ("DANBOORU_SITE_URL", "https://testbooru.donmai.us/"),
            ("DANBOORU_CACHE_DIR", "/tmp/tag-cache"),
            ("DANBOORU_REQUEST_DELAY", "0.25"),
        ]))
        .expect("should load");
        assert!(config.has_credentials());
        assert_eq!(config.site_url, "https://testbooru.donmai.us");
        assert_eq!(config.cache_path(), Some(PathBuf::from("/tmp/tag-cache").as_path()));
        assert_eq!(config.request_delay, Duration::from_millis(250));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ExpanderConfig::from_lookup(lookup(&[("DANBOORU_USERNAME", "  ")]))
            .expect("should load");
        assert!(config.username.is_none());
    }

    #[test]
    fn cache_path_respects_use_cache() {
        let mut config = ExpanderConfig::default().with_cache_dir(PathBuf::from("/tmp/x"));
        assert!(config.cache_path().is_some());
        config.use_cache = false;
        assert!(config.cache_path().is_none());
    }

    #[test]
    fn bad_delay_is_a_config_error() {
        assert!(parse_delay("soon").is_err());
        assert!(parse_delay("-1").is_err());
        assert_eq!(parse_delay("2").expect("valid"), Duration::from_secs(2));
    }

    #[test]
    fn site_url_strips_trailing_slashes() {
        assert_eq!(normalize_site_url("https://a.example//"), "https://a.example");
        assert_eq!(normalize_site_url("  "), DEFAULT_SITE_URL);
    }

    #[test]
    fn tilde_expands_only_as_leading_component() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_tilde(&PathBuf::from("~")), home);
        assert_eq!(expand_tilde(&PathBuf::from("~/cache")), home.join("cache"));
        assert_eq!(expand_tilde(&PathBuf::from("~user/x")), PathBuf::from("~user/x"));
        assert_eq!(expand_tilde(&PathBuf::from("/tmp/~")), PathBuf::from("/tmp/~"));
    }
}
