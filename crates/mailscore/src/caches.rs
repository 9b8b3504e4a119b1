//! The cache layer that makes repeated lookups cheap.
//!
//! One `TtlCache` per probe family, composed into a `Caches` value owned
//! by the engine. DNS, deliverability, domain-age, web-presence,
//! MX-popularity and provider-fingerprint entries are keyed by domain;
//! IP-reputation entries are keyed by MX host.

use crate::report::{
    DnsHealthDetail, DomainAgeDetail, FingerprintDetail, IpReputationDetail, MxPopularityDetail,
    WebPresenceDetail,
};
use std::time::Duration;
use ttl_cache::TtlCache;

/// A probe outcome as it is cached: the point contribution together with
/// the detail record it was derived from.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub points: i32,
    pub detail: T,
}

/// The SPF/DKIM/DMARC records backing the domain-security probe.
#[derive(Debug, Clone, Default)]
pub struct MailAuthRecords {
    pub spf: bool,
    pub dkim: bool,
    pub dmarc: bool,
    pub spf_record: Option<String>,
    pub dmarc_record: Option<String>,
}

pub struct Caches {
    ttl: Duration,
    pub dns: TtlCache<String, Scored<DnsHealthDetail>>,
    pub deliverability: TtlCache<String, MailAuthRecords>,
    pub domain_age: TtlCache<String, Scored<DomainAgeDetail>>,
    pub web_presence: TtlCache<String, Scored<WebPresenceDetail>>,
    pub provider_fingerprint: TtlCache<String, Scored<FingerprintDetail>>,
    pub ip_reputation: TtlCache<String, Scored<IpReputationDetail>>,
    pub mx_popularity: TtlCache<String, Scored<MxPopularityDetail>>,
}

impl Caches {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            dns: TtlCache::new(capacity),
            deliverability: TtlCache::new(capacity),
            domain_age: TtlCache::new(capacity),
            web_presence: TtlCache::new(capacity),
            provider_fingerprint: TtlCache::new(capacity),
            ip_reputation: TtlCache::new(capacity),
            mx_popularity: TtlCache::new(capacity),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn families_are_independent() {
        let caches = Caches::new(Duration::from_secs(60), 16);
        caches.dns.insert(
            "example.com".to_string(),
            Scored {
                points: 20,
                detail: DnsHealthDetail::default(),
            },
            caches.ttl(),
        );
        assert!(caches.dns.get("example.com").is_some());
        assert!(caches.web_presence.get("example.com").is_none());
        assert!(caches.domain_age.get("example.com").is_none());
    }
}
