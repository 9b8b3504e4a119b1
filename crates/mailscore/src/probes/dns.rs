//! DNS-driven probes: domain health, mail-auth records, DNSSEC, PTR,
//! DNSBL membership and the MX shape heuristics.

use crate::caches::{MailAuthRecords, Scored};
use crate::engine::Verifier;
use crate::errors::{classify_dns_answer, classify_dns_error};
use crate::providers::{
    DKIM_SELECTORS, POPULAR_MX_PATTERNS, TRUSTED_MX_BRANDS,
};
use crate::report::{
    DnsHealthDetail, DnssecDetail, DomainBlacklistsDetail, IpReputationDetail, MxBrandDetail,
    MxConsistencyDetail, MxPopularityDetail, MxRedundancyDetail, PtrDetail,
    SecurityReputationDetail,
};
use dns_probe::{
    dnsbl_query_name, fully_qualify, order_mx_hosts, Answer, DnsError, RecordType, Resolver,
};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::time::timeout;

pub(crate) const DNS_QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const DNS_TOTAL_BUDGET: Duration = Duration::from_secs(4);

/// One bounded DNS query. Timeouts surface as `ResolveFailed` so that
/// callers treat them like any other lookup failure.
pub(crate) async fn query(
    resolver: &dyn Resolver,
    name: &str,
    rrtype: RecordType,
) -> Result<Answer, DnsError> {
    let fq = fully_qualify(name)
        .map_err(|err| DnsError::InvalidName(format!("invalid name {name}: {err}")))?;
    match timeout(DNS_QUERY_TIMEOUT, resolver.resolve(fq, rrtype)).await {
        Ok(result) => result,
        Err(_) => Err(DnsError::ResolveFailed(format!(
            "timed out querying {rrtype} for {name}"
        ))),
    }
}

async fn resolve_mx_ip(resolver: &dyn Resolver, mx_host: &str) -> Option<IpAddr> {
    // MX targets in the wild are occasionally IP literals
    if let Ok(ip) = mx_host.parse::<IpAddr>() {
        return Some(ip);
    }
    match timeout(DNS_QUERY_TIMEOUT, resolver.resolve_ip(mx_host)).await {
        Ok(Ok(ips)) => ips.into_iter().next(),
        _ => None,
    }
}

/// Domain existence and DNS health. Cached per domain.
pub(crate) async fn dns_health(verifier: &Verifier, domain: &str) -> Scored<DnsHealthDetail> {
    if let Some(cached) = verifier.caches.dns.get(domain) {
        return cached;
    }

    let resolver = verifier.resolver.as_ref();
    let start = Instant::now();
    let budget = start + DNS_TOTAL_BUDGET;
    let mut points = 0;
    let mut detail = DnsHealthDetail::default();

    match query(resolver, domain, RecordType::A).await {
        Ok(answer) => {
            if !answer.as_addr().is_empty() {
                detail.domain_exists = true;
            } else {
                detail.error_kind = Some(classify_dns_answer(&answer));
            }
        }
        Err(err) => {
            detail.error_kind = Some(classify_dns_error(&err));
            tracing::debug!("A lookup for {domain} failed: {err}");
        }
    }

    if Instant::now() < budget {
        match query(resolver, domain, RecordType::MX).await {
            Ok(answer) => {
                let records = answer.as_mx();
                if !records.is_empty() {
                    detail.mx_present = true;
                    detail.mx_hosts = order_mx_hosts(records);
                    points += 20;
                }
            }
            Err(err) => tracing::debug!("MX lookup for {domain} failed: {err}"),
        }
    }

    if Instant::now() < budget {
        if let Ok(answer) = query(resolver, domain, RecordType::TXT).await {
            if answer.as_txt().iter().any(|txt| txt.starts_with("v=spf1")) {
                detail.spf_exists = true;
                points += 5;
            }
        }
    }

    if Instant::now() < budget {
        if let Ok(answer) = query(resolver, &format!("_dmarc.{domain}"), RecordType::TXT).await {
            if answer.as_txt().iter().any(|txt| txt.starts_with("v=DMARC1")) {
                detail.dmarc_exists = true;
                points += 5;
            }
        }
    }

    for selector in DKIM_SELECTORS {
        if Instant::now() >= budget {
            break;
        }
        let name = format!("{selector}._domainkey.{domain}");
        if let Ok(answer) = query(resolver, &name, RecordType::TXT).await {
            if !answer.as_txt().is_empty() {
                detail.dkim_exists = true;
                points += 5;
                break;
            }
        }
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    detail.dns_response_time_ms = (elapsed_ms * 100.0).round() / 100.0;
    if detail.domain_exists || detail.mx_present {
        detail.error_kind = None;
        if elapsed_ms < 300.0 {
            points += 3;
        } else if elapsed_ms > 800.0 {
            points -= 3;
        }
    }

    let scored = Scored { points, detail };
    verifier
        .caches
        .dns
        .insert(domain.to_string(), scored.clone(), verifier.caches.ttl());
    scored
}

/// The SPF/DKIM/DMARC record set, resolved once per domain per TTL.
pub(crate) async fn deliverability(verifier: &Verifier, domain: &str) -> MailAuthRecords {
    if let Some(cached) = verifier.caches.deliverability.get(domain) {
        return cached;
    }

    let resolver = verifier.resolver.as_ref();
    let mut records = MailAuthRecords::default();

    if let Ok(answer) = query(resolver, domain, RecordType::TXT).await {
        for txt in answer.as_txt() {
            if txt.starts_with("v=spf1") {
                records.spf = true;
                records.spf_record = Some(txt);
            }
        }
    }

    if let Ok(answer) = query(resolver, &format!("_dmarc.{domain}"), RecordType::TXT).await {
        for txt in answer.as_txt() {
            if txt.starts_with("v=DMARC1") {
                records.dmarc = true;
                records.dmarc_record = Some(txt);
            }
        }
    }

    for selector in DKIM_SELECTORS {
        let name = format!("{selector}._domainkey.{domain}");
        if let Ok(answer) = query(resolver, &name, RecordType::TXT).await {
            if !answer.as_txt().is_empty() {
                records.dkim = true;
                break;
            }
        }
    }

    verifier.caches.deliverability.insert(
        domain.to_string(),
        records.clone(),
        verifier.caches.ttl(),
    );
    records
}

pub(crate) fn security_reputation(records: &MailAuthRecords) -> (i32, SecurityReputationDetail) {
    let mut points = 0;
    let mut detail = SecurityReputationDetail::default();

    if records.spf {
        if let Some(spf) = &records.spf_record {
            // A strong SPF record carries mechanisms beyond the bare version tag
            if spf.len() > 10
                && (spf.contains("include:") || spf.contains("ip4:") || spf.contains("ip6:"))
            {
                detail.strong_spf = true;
                points += 3;
            }
        }
    }

    if records.dkim && records.dmarc {
        detail.dkim_dmarc_aligned = true;
        points += 5;
    }

    (points, detail)
}

pub(crate) async fn dnssec(verifier: &Verifier, domain: &str) -> (i32, DnssecDetail) {
    match query(verifier.resolver.as_ref(), domain, RecordType::DNSKEY).await {
        Ok(answer) if !answer.is_empty() => (
            5,
            DnssecDetail {
                dnssec_enabled: true,
                skipped: false,
            },
        ),
        Ok(_) => (0, DnssecDetail::default()),
        Err(err) => {
            tracing::debug!("DNSKEY lookup for {domain} failed: {err}");
            (
                0,
                DnssecDetail {
                    dnssec_enabled: false,
                    skipped: true,
                },
            )
        }
    }
}

pub(crate) async fn ptr_record(verifier: &Verifier, mx_host: &str) -> (i32, PtrDetail) {
    let resolver = verifier.resolver.as_ref();
    let Some(ip) = resolve_mx_ip(resolver, mx_host).await else {
        return (
            0,
            PtrDetail {
                skipped: true,
                ..PtrDetail::default()
            },
        );
    };

    match timeout(DNS_QUERY_TIMEOUT, resolver.resolve_ptr(ip)).await {
        Ok(Ok(ptrs)) if !ptrs.is_empty() => {
            let ptr = ptrs[0].trim_end_matches('.').to_string();
            let matched = mx_host.contains(&ptr) || ptr.contains(mx_host);
            (
                if matched { 5 } else { -5 },
                PtrDetail {
                    ptr_match: matched,
                    ptr_record: Some(ptr),
                    skipped: false,
                },
            )
        }
        _ => (-5, PtrDetail::default()),
    }
}

/// Spamhaus ZEN membership for the MX's address. Cached per MX host.
pub(crate) async fn ip_reputation(
    verifier: &Verifier,
    mx_host: &str,
) -> Scored<IpReputationDetail> {
    if let Some(cached) = verifier.caches.ip_reputation.get(mx_host) {
        return cached;
    }

    let resolver = verifier.resolver.as_ref();
    let scored = match resolve_mx_ip(resolver, mx_host).await {
        Some(ip) => {
            let name = dnsbl_query_name(ip, "zen.spamhaus.org");
            let listed = matches!(
                query(resolver, &name, RecordType::A).await,
                Ok(answer) if !answer.as_addr().is_empty()
            );
            let detail = IpReputationDetail {
                blacklisted: listed,
                sources_checked: vec!["spamhaus"],
                skipped: false,
            };
            Scored {
                points: if listed { -10 } else { 10 },
                detail,
            }
        }
        None => Scored {
            points: 0,
            detail: IpReputationDetail {
                skipped: true,
                ..IpReputationDetail::default()
            },
        },
    };

    verifier.caches.ip_reputation.insert(
        mx_host.to_string(),
        scored.clone(),
        verifier.caches.ttl(),
    );
    scored
}

/// MX -> A -> PTR -> A sanity cycle.
pub(crate) async fn mx_consistency(
    verifier: &Verifier,
    mx_host: &str,
) -> (i32, MxConsistencyDetail) {
    let resolver = verifier.resolver.as_ref();
    let mut detail = MxConsistencyDetail::default();

    let Some(mx_ip) = resolve_mx_ip(resolver, mx_host).await else {
        return (-10, detail);
    };
    detail.mx_to_a = true;
    detail.mx_ip = Some(mx_ip);

    let ptr = match timeout(DNS_QUERY_TIMEOUT, resolver.resolve_ptr(mx_ip)).await {
        Ok(Ok(ptrs)) if !ptrs.is_empty() => ptrs[0].trim_end_matches('.').to_string(),
        _ => return (-10, detail),
    };
    detail.a_to_ptr = true;
    detail.ptr_record = Some(ptr.clone());

    match timeout(DNS_QUERY_TIMEOUT, resolver.resolve_ip(&ptr)).await {
        Ok(Ok(ips)) if ips.contains(&mx_ip) => {
            detail.ptr_to_a = true;
            detail.perfect_cycle = true;
            (10, detail)
        }
        _ => (-10, detail),
    }
}

/// Spamhaus DBL and SURBL lookups for the domain itself.
pub(crate) async fn domain_blacklists(
    verifier: &Verifier,
    domain: &str,
) -> (i32, DomainBlacklistsDetail) {
    let resolver = verifier.resolver.as_ref();
    let mut detail = DomainBlacklistsDetail::default();

    for (zone, source) in [
        ("dbl.spamhaus.org", "spamhaus_dbl"),
        ("multi.surbl.org", "surbl"),
    ] {
        match query(resolver, &format!("{domain}.{zone}"), RecordType::A).await {
            Ok(answer) if !answer.as_addr().is_empty() => {
                detail.blacklisted = true;
                detail.sources_checked.push(source);
                return (-10, detail);
            }
            Ok(_) => detail.sources_checked.push(source),
            Err(err) => {
                tracing::debug!("{source} lookup for {domain} failed: {err}");
                detail.skipped = true;
                return (0, detail);
            }
        }
    }

    (10, detail)
}

pub(crate) fn mx_redundancy(mx_hosts: &[String]) -> (i32, MxRedundancyDetail) {
    let mx_count = mx_hosts.len();
    let (redundancy, points) = match mx_count {
        0 => ("none", -20),
        1 => ("single", -3),
        2..=4 => ("strong", 5),
        _ => ("excessive", 3),
    };
    (
        points,
        MxRedundancyDetail {
            mx_count,
            redundancy,
        },
    )
}

pub(crate) fn mx_brand(mx_host: &str) -> (i32, MxBrandDetail) {
    let mx_lower = mx_host.to_ascii_lowercase();
    for &(pattern, brand) in TRUSTED_MX_BRANDS {
        if mx_lower.contains(pattern) {
            return (
                10,
                MxBrandDetail {
                    brand,
                    trusted: true,
                },
            );
        }
    }
    (
        0,
        MxBrandDetail {
            brand: "custom",
            trusted: false,
        },
    )
}

/// Whether the MX belongs to widely shared hosting infrastructure.
/// Cached per domain.
pub(crate) fn mx_popularity(verifier: &Verifier, domain: &str, mx_host: &str) -> Scored<MxPopularityDetail> {
    if let Some(cached) = verifier.caches.mx_popularity.get(domain) {
        return cached;
    }

    let mx_lower = mx_host.to_ascii_lowercase();
    let scored = match POPULAR_MX_PATTERNS
        .iter()
        .copied()
        .find(|pattern| mx_lower.contains(pattern))
    {
        Some(pattern) => Scored {
            points: 10,
            detail: MxPopularityDetail {
                popularity: "high",
                mx_pattern: Some(pattern),
            },
        },
        None => Scored {
            points: 0,
            detail: MxPopularityDetail {
                popularity: "unknown",
                mx_pattern: None,
            },
        },
    };

    verifier.caches.mx_popularity.insert(
        domain.to_string(),
        scored.clone(),
        verifier.caches.ttl(),
    );
    scored
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn redundancy_buckets() {
        let hosts = |n: usize| vec!["mx.example.com".to_string(); n];
        assert_eq!(mx_redundancy(&hosts(0)).0, -20);
        assert_eq!(mx_redundancy(&hosts(1)).0, -3);
        assert_eq!(mx_redundancy(&hosts(2)).0, 5);
        assert_eq!(mx_redundancy(&hosts(4)).0, 5);
        assert_eq!(mx_redundancy(&hosts(5)).0, 3);
        assert_eq!(mx_redundancy(&hosts(9)).0, 3);
    }

    #[test]
    fn brand_table() {
        let (points, detail) = mx_brand("aspmx.l.google.com");
        assert_eq!(points, 10);
        assert!(detail.trusted);
        assert_eq!(detail.brand, "Gmail");

        let (points, detail) = mx_brand("mx1.selfhosted.example");
        assert_eq!(points, 0);
        assert_eq!(detail.brand, "custom");
    }

    #[test]
    fn security_reputation_scoring() {
        let mut records = MailAuthRecords {
            spf: true,
            spf_record: Some("v=spf1 include:_spf.example.com ~all".to_string()),
            dkim: true,
            dmarc: true,
            dmarc_record: Some("v=DMARC1; p=reject".to_string()),
        };
        let (points, detail) = security_reputation(&records);
        assert_eq!(points, 8);
        assert!(detail.strong_spf);
        assert!(detail.dkim_dmarc_aligned);

        // A bare "v=spf1 -all" is not strong
        records.spf_record = Some("v=spf1 -all".to_string());
        records.dkim = false;
        let (points, detail) = security_reputation(&records);
        assert_eq!(points, 0);
        assert!(!detail.strong_spf);
        assert!(!detail.dkim_dmarc_aligned);
    }
}
