//! Typed probe results and the verdict schema.
//!
//! Every probe produces a `ProbeReport`: an integer point contribution
//! plus a probe-specific detail record. The final score is a reduce over
//! the ordered report list; the verdict bucket is derived solely from the
//! clamped score.

use crate::errors::ErrorKind;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::IpAddr;

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Valid,
    LikelyValid,
    Uncertain,
    LikelyInvalid,
    Invalid,
}

impl Status {
    /// The only place where a score becomes a status.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Self::Valid,
            70..=89 => Self::LikelyValid,
            50..=69 => Self::Uncertain,
            20..=49 => Self::LikelyInvalid,
            _ => Self::Invalid,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Valid => "Very likely valid",
            Self::LikelyValid => "Probably valid but unconfirmed",
            Self::Uncertain => "Uncertain (common when SMTP blocks verification)",
            Self::LikelyInvalid => "Likely invalid",
            Self::Invalid => "Definitely invalid",
        }
    }
}

/// Reserved: accepted at the public surface but not consumed by the
/// scoring path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    Strict,
    #[default]
    Balanced,
    Lenient,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub fast_mode: bool,
    pub confidence_mode: ConfidenceMode,
    pub internet_checks: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            fast_mode: true,
            confidence_mode: ConfidenceMode::default(),
            internet_checks: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub points: i32,
    #[serde(flatten)]
    pub detail: ProbeDetail,
}

/// Probe details keyed by probe name, in the order the probes ran,
/// with the optional enrichment payload alongside.
#[derive(Debug, Default)]
pub struct Details {
    pub(crate) probes: Vec<(&'static str, ProbeReport)>,
    pub internet_check: Option<serde_json::Value>,
}

impl Details {
    pub(crate) fn push(&mut self, name: &'static str, points: i32, detail: ProbeDetail) {
        self.probes.push((name, ProbeReport { points, detail }));
    }

    pub fn get(&self, name: &str) -> Option<&ProbeReport> {
        self.probes
            .iter()
            .find(|(probe, _)| *probe == name)
            .map(|(_, report)| report)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ProbeReport)> {
        self.probes.iter().map(|(name, report)| (*name, report))
    }

    /// The score before provider caps and clamping: the sum of every
    /// probe's contribution, in declared order.
    pub fn total_points(&self) -> i32 {
        self.probes.iter().map(|(_, report)| report.points).sum()
    }
}

impl Serialize for Details {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.internet_check.is_some());
        let mut map = serializer.serialize_map(Some(self.probes.len() + extra))?;
        for (name, report) in &self.probes {
            map.serialize_entry(name, report)?;
        }
        if let Some(payload) = &self.internet_check {
            map.serialize_entry("internet_check", payload)?;
        }
        map.end()
    }
}

/// The stable verdict schema.
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub email: String,
    pub status: Status,
    pub score: u8,
    pub confidence: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "is_false")]
    pub risky: bool,
    pub details: Details,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProbeDetail {
    Syntax(SyntaxDetail),
    DnsHealth(DnsHealthDetail),
    DomainAge(DomainAgeDetail),
    SmtpConnection(SmtpConnectionDetail),
    SmtpGreeting(GreetingDetail),
    SmtpRcpt(RcptDetail),
    SmtpTiming(TimingDetail),
    SecurityReputation(SecurityReputationDetail),
    WebPresence(WebPresenceDetail),
    ProviderFingerprint(FingerprintDetail),
    ErrorPattern(ErrorPatternDetail),
    ProviderRules(ProviderRuleDetail),
    SmtpRetry(RetryDetail),
    TlsCertificate(TlsCertificateDetail),
    MailPorts(MailPortsDetail),
    Dnssec(DnssecDetail),
    PtrRecord(PtrDetail),
    IpReputation(IpReputationDetail),
    ServerBehavior(ServerBehaviorDetail),
    MxPopularity(MxPopularityDetail),
    BlocklistBehavior(BlocklistBehaviorDetail),
    MxConsistency(MxConsistencyDetail),
    TlsPolicy(TlsPolicyDetail),
    MxRedundancy(MxRedundancyDetail),
    SmtpStrictness(StrictnessDetail),
    MailFromHealth(MailFromHealthDetail),
    LatencyFingerprint(LatencyFingerprintDetail),
    LoadBalancer(LoadBalancerDetail),
    VrfyLite(VrfyLiteDetail),
    RoleAccounts(RoleAccountsDetail),
    MxBrand(MxBrandDetail),
    GreylistDepth(GreylistDepthDetail),
    SmtpBanner(BannerDetail),
    DomainBlacklists(DomainBlacklistsDetail),
    QuitBehavior(QuitDetail),
    TcpStability(TcpStabilityDetail),
    CatchAll(CatchAllDetail),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyntaxDetail {
    pub valid: bool,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DnsHealthDetail {
    pub domain_exists: bool,
    pub mx_present: bool,
    pub mx_hosts: Vec<String>,
    pub spf_exists: bool,
    pub dkim_exists: bool,
    pub dmarc_exists: bool,
    pub dns_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainAgeDetail {
    pub age_months: Option<f64>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmtpConnectionDetail {
    pub port_25_open: bool,
    pub tls_successful: bool,
    pub mx_used: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GreetingDetail {
    pub code: Option<u16>,
    pub message: String,
    pub valid: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RcptDetail {
    pub accepted: bool,
    pub rejected: bool,
    pub hard_failure: bool,
    pub soft_failure: bool,
    pub response_code: Option<u16>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingDetail {
    pub response_time_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityReputationDetail {
    pub strong_spf: bool,
    pub dkim_dmarc_aligned: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebPresenceDetail {
    pub has_website: bool,
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FingerprintDetail {
    pub capabilities: BTreeMap<&'static str, bool>,
    pub reliability_boost: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_close: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorPatternDetail {
    pub category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderRuleDetail {
    pub provider: Option<String>,
    pub rule_applied: bool,
    pub score_adjusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_score: Option<i32>,
    #[serde(skip_serializing_if = "is_false")]
    pub reliable_rejection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryAttempt {
    pub delay_secs: u64,
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryDetail {
    pub success_after_retry: bool,
    pub retries: Vec<RetryAttempt>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TlsCertificateDetail {
    pub domain_match: bool,
    pub reputable_ca: bool,
    pub self_signed: bool,
    pub expired: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub no_tls: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MailPortsDetail {
    pub open_ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DnssecDetail {
    pub dnssec_enabled: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PtrDetail {
    pub ptr_match: bool,
    pub ptr_record: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IpReputationDetail {
    pub blacklisted: bool,
    pub sources_checked: Vec<&'static str>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerBehaviorDetail {
    pub allows_ehlo: bool,
    pub supports_starttls: bool,
    pub normal_response: bool,
    pub slow_response: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MxPopularityDetail {
    pub popularity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mx_pattern: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BlocklistBehaviorDetail {
    pub behavior: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MxConsistencyDetail {
    pub mx_to_a: bool,
    pub a_to_ptr: bool,
    pub ptr_to_a: bool,
    pub perfect_cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mx_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr_record: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TlsPolicyDetail {
    pub supports_starttls: bool,
    pub allows_downgrade: bool,
    pub modern_ciphers: bool,
    pub secure: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MxRedundancyDetail {
    pub mx_count: usize,
    pub redundancy: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrictnessChecks {
    pub valid_ehlo: bool,
    pub validates_mailfrom: bool,
    pub rejects_malformed: bool,
    pub enforces_antispam: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrictnessDetail {
    pub strictness_level: &'static str,
    pub checks: StrictnessChecks,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MailFromHealthDetail {
    pub rejects_rare_domain: bool,
    pub accepts_anything: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyFingerprintDetail {
    pub rcpt_latency_sec: f64,
    pub pattern: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadBalancerResponse {
    pub mx: String,
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadBalancerDetail {
    pub consistent: bool,
    pub responses: Vec<LoadBalancerResponse>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VrfyLiteDetail {
    pub domain_response: Option<u16>,
    pub user_response: Option<u16>,
    pub different_responses: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleAccountProbe {
    pub valid: bool,
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "is_false")]
    pub error: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleAccountsDetail {
    pub role_accounts: BTreeMap<&'static str, RoleAccountProbe>,
    pub all_valid: bool,
    pub all_invalid: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MxBrandDetail {
    pub brand: &'static str,
    pub trusted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GreylistDepthDetail {
    pub depth: u32,
    pub pattern_matches: bool,
    pub responses: Vec<RetryAttempt>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BannerDetail {
    pub has_metadata: bool,
    pub provider_identified: bool,
    pub professional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identified_provider: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainBlacklistsDetail {
    pub blacklisted: bool,
    pub sources_checked: Vec<&'static str>,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuitDetail {
    pub proper_quit: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TcpStabilityDetail {
    pub stable: bool,
    pub retransmissions_detected: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatchAllDetail {
    pub is_catchall: bool,
    pub test_address: String,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn score_to_status_thresholds() {
        assert_eq!(Status::from_score(100), Status::Valid);
        assert_eq!(Status::from_score(90), Status::Valid);
        assert_eq!(Status::from_score(89), Status::LikelyValid);
        assert_eq!(Status::from_score(70), Status::LikelyValid);
        assert_eq!(Status::from_score(69), Status::Uncertain);
        assert_eq!(Status::from_score(50), Status::Uncertain);
        assert_eq!(Status::from_score(49), Status::LikelyInvalid);
        assert_eq!(Status::from_score(20), Status::LikelyInvalid);
        assert_eq!(Status::from_score(19), Status::Invalid);
        assert_eq!(Status::from_score(0), Status::Invalid);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Status::LikelyInvalid).unwrap(),
            "\"likely_invalid\""
        );
    }

    #[test]
    fn details_preserve_probe_order_and_sum() {
        let mut details = Details::default();
        details.push(
            "syntax",
            10,
            ProbeDetail::Syntax(SyntaxDetail {
                valid: true,
                reason: "Valid syntax",
            }),
        );
        details.push(
            "mx_redundancy",
            -3,
            ProbeDetail::MxRedundancy(MxRedundancyDetail {
                mx_count: 1,
                redundancy: "single",
            }),
        );
        assert_eq!(details.total_points(), 7);

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["syntax"]["points"], 10);
        assert_eq!(json["syntax"]["valid"], true);
        assert_eq!(json["mx_redundancy"]["points"], -3);
        assert_eq!(json["mx_redundancy"]["redundancy"], "single");
    }

    #[test]
    fn report_envelope_flattens_detail() {
        let report = ProbeReport {
            points: -10,
            detail: ProbeDetail::WebPresence(WebPresenceDetail {
                has_website: false,
                http_status: None,
                skipped: false,
            }),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["points"], -10);
        assert_eq!(json["has_website"], false);
        assert!(json.get("skipped").is_none());
    }
}
