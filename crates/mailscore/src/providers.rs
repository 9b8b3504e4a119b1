//! Provider-level behaviour tables: per-domain score caps for providers
//! whose RCPT verification is known-unreliable, the suffixes for which
//! SMTP probing is pointless, and the various pattern tables consulted by
//! the MX and banner probes.

use serde::Serialize;
use std::sync::LazyLock;
use suffix_map::SuffixMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderRule {
    pub max_score_without_rcpt: u8,
    pub always_blocks: bool,
    pub may_accept_all: bool,
    pub accept_all: bool,
    pub reliable_rejections: bool,
}

pub(crate) static PROVIDER_RULES: LazyLock<SuffixMap<ProviderRule>> = LazyLock::new(|| {
    let blocks = |max| ProviderRule {
        max_score_without_rcpt: max,
        always_blocks: true,
        ..ProviderRule::default()
    };

    let mut rules = SuffixMap::new();
    rules.insert("gmail.com", blocks(55));
    rules.insert("googlemail.com", blocks(55));
    rules.insert(
        "outlook.com",
        ProviderRule {
            max_score_without_rcpt: 60,
            always_blocks: true,
            may_accept_all: true,
            ..ProviderRule::default()
        },
    );
    rules.insert("hotmail.com", blocks(60));
    rules.insert("live.com", blocks(60));
    rules.insert("yahoo.com", blocks(55));
    rules.insert("yahoo.co.uk", blocks(55));
    rules.insert(
        "zoho.com",
        ProviderRule {
            max_score_without_rcpt: 75,
            reliable_rejections: true,
            ..ProviderRule::default()
        },
    );
    rules.insert(
        "protonmail.com",
        ProviderRule {
            max_score_without_rcpt: 50,
            always_blocks: true,
            accept_all: true,
            ..ProviderRule::default()
        },
    );
    rules.insert("icloud.com", blocks(50));
    rules.insert("me.com", blocks(50));
    rules.insert("mac.com", blocks(50));
    rules
});

/// Domains that typically block SMTP verification; the session probe
/// skips them entirely rather than tripping their anti-abuse heuristics.
pub(crate) static SMTP_BLOCKED_PROVIDERS: LazyLock<SuffixMap<()>> = LazyLock::new(|| {
    let mut map = SuffixMap::new();
    for suffix in [
        "outlook.com",
        "hotmail.com",
        "live.com",
        "msn.com",
        "gmail.com",
        "googlemail.com",
        "yahoo.com",
        "yahoo.co.uk",
        "aol.com",
        "icloud.com",
        "me.com",
        "mac.com",
        "microsoft.com",
        "office365.com",
    ] {
        map.insert(suffix, ());
    }
    map
});

/// MX hostname fragments of transactional-sender infrastructure whose
/// inbound endpoints say nothing about mailbox existence.
pub(crate) const TRANSACTIONAL_MX_PATTERNS: &[&str] = &[
    "inbound-smtp",
    "amazonaws.com",
    "sendgrid.net",
    "mailgun.org",
    "mailgun.com",
    "sparkpostmail.com",
    "postmarkapp.com",
    "mandrillapp.com",
];

/// MX host fragment to brand name, for the infrastructure identity probe.
pub(crate) const TRUSTED_MX_BRANDS: &[(&str, &'static str)] = &[
    ("google.com", "Gmail"),
    ("outlook.com", "Microsoft"),
    ("secureserver.net", "GoDaddy"),
    ("privateemail.com", "Namecheap"),
    ("mailsrvr.com", "Rackspace"),
    ("amazonaws.com", "AWS SES"),
    ("sendgrid.net", "SendGrid"),
    ("mailgun.org", "Mailgun"),
    ("mailgun.com", "Mailgun"),
    ("zoho.com", "Zoho"),
    ("yahoo.com", "Yahoo"),
    ("aol.com", "AOL"),
];

/// MX host fragments of widely shared hosting providers.
pub(crate) const POPULAR_MX_PATTERNS: &[&str] = &[
    "privateemail.com",
    "zoho.com",
    "hostinger.com",
    "google.com",
    "outlook.com",
    "yahoo.com",
    "amazonaws.com",
    "sendgrid.net",
    "mailgun.org",
];

pub(crate) const BANNER_PROVIDER_TOKENS: &[&str] = &[
    "esmtp",
    "postfix",
    "sendmail",
    "exim",
    "microsoft",
    "exchange",
    "mailjet",
    "sendgrid",
    "mailgun",
    "amazon",
    "google",
];

pub(crate) const BANNER_SUSPICIOUS_TOKENS: &[&str] = &["test", "fake", "honeypot", "spam"];

pub(crate) const DKIM_SELECTORS: &[&str] =
    &["default", "google", "selector1", "selector2", "k1", "mail"];

pub(crate) const ROLE_ACCOUNTS: &[&str] = &["postmaster", "abuse", "support", "info"];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rule_table_is_bit_exact() {
        let gmail = PROVIDER_RULES.get("gmail.com").unwrap();
        assert_eq!(gmail.max_score_without_rcpt, 55);
        assert!(gmail.always_blocks);
        assert!(!gmail.may_accept_all);

        let outlook = PROVIDER_RULES.get("outlook.com").unwrap();
        assert_eq!(outlook.max_score_without_rcpt, 60);
        assert!(outlook.always_blocks);
        assert!(outlook.may_accept_all);

        let zoho = PROVIDER_RULES.get("zoho.com").unwrap();
        assert_eq!(zoho.max_score_without_rcpt, 75);
        assert!(!zoho.always_blocks);
        assert!(zoho.reliable_rejections);

        let proton = PROVIDER_RULES.get("protonmail.com").unwrap();
        assert_eq!(proton.max_score_without_rcpt, 50);
        assert!(proton.always_blocks);
        assert!(proton.accept_all);

        for suffix in ["icloud.com", "me.com", "mac.com"] {
            assert_eq!(
                PROVIDER_RULES.get(suffix).unwrap().max_score_without_rcpt,
                50,
                "{suffix}"
            );
        }
    }

    #[test]
    fn rules_match_subdomains_by_suffix() {
        assert!(PROVIDER_RULES.get("mail.yahoo.co.uk").is_some());
        assert!(PROVIDER_RULES.get("yahoo.co").is_none());
        assert!(PROVIDER_RULES.get("example.com").is_none());
    }

    #[test]
    fn blocked_provider_lookup() {
        assert!(SMTP_BLOCKED_PROVIDERS.get("gmail.com").is_some());
        assert!(SMTP_BLOCKED_PROVIDERS.get("corp.example.com").is_none());
    }
}
