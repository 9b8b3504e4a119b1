use crate::report::Status;
use std::collections::HashMap;
use std::time::Duration;

/// Per-domain override applied after verdict mapping: raise the score to
/// a floor and/or force the status outright. Intended for internal and
/// testing use.
#[derive(Debug, Clone, Default)]
pub struct DomainOverride {
    pub min_score: Option<u8>,
    pub force_status: Option<Status>,
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Port used for every SMTP dialogue. 25 in production; tests point
    /// this at loopback fixtures.
    pub smtp_port: u16,
    /// Single TTL shared by all probe-family caches.
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Governs invocation of the external-presence adapter.
    pub enable_internet_checks: bool,
    /// Passed through to the adapter.
    pub enable_hibp: bool,
    /// Domain used in `MAIL FROM:<verify@...>` and as the EHLO name.
    pub sender_domain: String,
    /// Base URL of the RDAP service consulted for domain age.
    pub rdap_base_url: String,
    /// Candidate web origins for the presence probe, tried in order;
    /// `{domain}` is substituted.
    pub web_url_templates: Vec<String>,
    pub http_timeout: Duration,
    /// Overall budget for a single verification.
    pub verify_budget: Duration,
    pub overrides: HashMap<String, DomainOverride>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            smtp_port: 25,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 4096,
            enable_internet_checks: true,
            enable_hibp: true,
            sender_domain: default_sender_domain(),
            rdap_base_url: "https://rdap.org".to_string(),
            web_url_templates: vec![
                "https://{domain}".to_string(),
                "http://{domain}".to_string(),
            ],
            http_timeout: Duration::from_secs(5),
            verify_budget: Duration::from_secs(120),
            overrides: HashMap::new(),
        }
    }
}

impl VerifierConfig {
    /// Build a config from the process environment:
    /// `ENABLE_INTERNET_CHECKS`, `ENABLE_HIBP` (both default true) and
    /// `VERIFIER_SENDER_DOMAIN` (defaults to the local host name).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.enable_internet_checks = env_truthy("ENABLE_INTERNET_CHECKS", true);
        config.enable_hibp = env_truthy("ENABLE_HIBP", true);
        if let Ok(sender) = std::env::var("VERIFIER_SENDER_DOMAIN") {
            if !sender.is_empty() {
                config.sender_domain = sender;
            }
        }
        config
    }
}

fn default_sender_domain() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn env_truthy(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.smtp_port, 25);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert!(config.enable_internet_checks);
        assert!(config.enable_hibp);
        assert!(!config.sender_domain.is_empty());
    }

    #[test]
    fn env_truthy_parsing() {
        // Process-global env; pick names no other test uses.
        std::env::set_var("MAILSCORE_TEST_TRUTHY", "YES");
        assert!(env_truthy("MAILSCORE_TEST_TRUTHY", false));
        std::env::set_var("MAILSCORE_TEST_TRUTHY", "0");
        assert!(!env_truthy("MAILSCORE_TEST_TRUTHY", true));
        std::env::set_var("MAILSCORE_TEST_TRUTHY", "nope");
        assert!(!env_truthy("MAILSCORE_TEST_TRUTHY", true));
        std::env::remove_var("MAILSCORE_TEST_TRUTHY");
        assert!(env_truthy("MAILSCORE_TEST_TRUTHY", true));
    }
}
