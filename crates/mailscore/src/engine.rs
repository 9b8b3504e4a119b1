//! The orchestrator: drives the probe sequence, accumulates points over
//! the ordered report list, applies the provider cap and catch-all risk
//! flag, and maps the final clamped score to a verdict.

use crate::caches::{Caches, Scored};
use crate::config::VerifierConfig;
use crate::context::VerifyCtx;
use crate::enrich::{NoopEnricher, PresenceEnricher};
use crate::probes::{age, ancillary, dns, heuristics, rcpt, session, syntax, web};
use crate::providers::PROVIDER_RULES;
use crate::report::{
    Details, DnssecDetail, DomainBlacklistsDetail, IpReputationDetail, MxConsistencyDetail,
    ProbeDetail, ProviderRuleDetail, PtrDetail, RcptDetail, Status, TimingDetail, VerifyOptions,
    VerifyReport,
};
use anyhow::Context;
use dns_probe::{HickoryResolver, Resolver};
use std::sync::Arc;

pub struct Verifier {
    pub(crate) config: VerifierConfig,
    pub(crate) caches: Caches,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) http: reqwest::Client,
    enricher: Arc<dyn PresenceEnricher>,
}

impl Verifier {
    /// Build a verifier backed by the system resolver configuration.
    pub fn new(config: VerifierConfig) -> anyhow::Result<Self> {
        let resolver: Arc<dyn Resolver> =
            Arc::new(HickoryResolver::new().context("initializing DNS resolver")?);
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(
        config: VerifierConfig,
        resolver: Arc<dyn Resolver>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("building HTTP client")?;
        let caches = Caches::new(config.cache_ttl, config.cache_capacity);
        Ok(Self {
            config,
            caches,
            resolver,
            http,
            enricher: Arc::new(NoopEnricher),
        })
    }

    pub fn set_enricher(&mut self, enricher: Arc<dyn PresenceEnricher>) {
        self.enricher = enricher;
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify a single address. Never fails: whatever the remote
    /// infrastructure does ends up as probe detail, not an error.
    pub async fn verify(&self, email: &str, options: &VerifyOptions) -> VerifyReport {
        let mut ctx = VerifyCtx::new(email, options.fast_mode, self.config.verify_budget);
        let mut details = Details::default();

        // Syntax gate: an address that doesn't parse never touches the
        // network.
        let (points, syntax_detail) = syntax::check_syntax(email);
        let syntax_valid = syntax_detail.valid;
        details.push("syntax", points, ProbeDetail::Syntax(syntax_detail));
        if !syntax_valid {
            return VerifyReport {
                email: email.to_string(),
                status: Status::Invalid,
                score: 0,
                confidence: 0.0,
                reason: "Invalid email syntax".to_string(),
                risky: false,
                details,
            };
        }

        // DNS health gates everything else.
        let dns_scored = dns::dns_health(self, &ctx.domain).await;
        let domain_resolves = dns_scored.detail.domain_exists || dns_scored.detail.mx_present;
        ctx.mx_hosts = dns_scored.detail.mx_hosts.clone();
        details.push(
            "dns_health",
            dns_scored.points,
            ProbeDetail::DnsHealth(dns_scored.detail),
        );
        if !domain_resolves {
            let score = details.total_points().clamp(0, 100) as u8;
            return VerifyReport {
                email: email.to_string(),
                status: Status::Invalid,
                score,
                confidence: score as f64 / 100.0,
                reason: "Domain does not exist".to_string(),
                risky: false,
                details,
            };
        }

        let fast = ctx.fast_mode;

        // Domain age, the mail-auth record set and web presence have no
        // ordering dependency on each other or on the SMTP session; run
        // them together and merge in declared order.
        let (age_scored, auth_records, web_scored) = tokio::join!(
            age::domain_age(self, &ctx.domain),
            dns::deliverability(self, &ctx.domain),
            web::web_presence(self, &ctx.domain),
        );
        details.push(
            "domain_age",
            age_scored.points,
            ProbeDetail::DomainAge(age_scored.detail),
        );

        // SMTP session and RCPT, strictly sequential: the RCPT dialogue
        // must observe the session result.
        let session_outcome =
            session::smtp_session(self, &ctx.domain, &ctx.mx_hosts, fast).await;
        ctx.session = session_outcome.snapshot;
        details.push(
            "smtp_connection",
            session_outcome.connection_points,
            ProbeDetail::SmtpConnection(session::connection_detail(&ctx.session)),
        );
        details.push(
            "smtp_greeting",
            session_outcome.greeting_points,
            ProbeDetail::SmtpGreeting(session::greeting_detail(&ctx.session)),
        );

        let rcpt_outcome = rcpt::smtp_rcpt(self, &ctx.email, &ctx.session, fast).await;
        ctx.rcpt = rcpt_outcome.snapshot;
        details.push(
            "smtp_rcpt",
            rcpt_outcome.points,
            ProbeDetail::SmtpRcpt(RcptDetail {
                accepted: ctx.rcpt.accepted,
                rejected: ctx.rcpt.rejected,
                hard_failure: ctx.rcpt.hard_failure,
                soft_failure: ctx.rcpt.soft_failure,
                response_code: ctx.rcpt.response_code,
                error: ctx.rcpt.error.clone(),
                error_kind: rcpt_outcome.error_kind,
                skipped: ctx.rcpt.skipped,
            }),
        );
        details.push(
            "smtp_timing",
            rcpt_outcome.timing_points,
            ProbeDetail::SmtpTiming(TimingDetail {
                response_time_sec: ctx
                    .rcpt
                    .rcpt_latency
                    .map(|latency| (latency.as_secs_f64() * 100.0).round() / 100.0)
                    .unwrap_or(0.0),
            }),
        );

        let (points, detail) = dns::security_reputation(&auth_records);
        details.push(
            "security_reputation",
            points,
            ProbeDetail::SecurityReputation(detail),
        );
        details.push(
            "web_presence",
            web_scored.points,
            ProbeDetail::WebPresence(web_scored.detail),
        );

        if !fast && !ctx.expired() {
            let scored =
                ancillary::provider_fingerprint(self, &ctx.domain, &ctx.session, &ctx.mx_hosts)
                    .await;
            details.push(
                "provider_fingerprint",
                scored.points,
                ProbeDetail::ProviderFingerprint(scored.detail),
            );
        }

        let (points, detail) = heuristics::error_pattern(&ctx.rcpt, &ctx.session);
        details.push("error_pattern", points, ProbeDetail::ErrorPattern(detail));

        if !fast && ctx.rcpt.soft_failure && !ctx.expired() {
            let (points, detail) = ancillary::smtp_retry(self, &ctx.email, &ctx.mx_hosts).await;
            details.push("smtp_retry", points, ProbeDetail::SmtpRetry(detail));
        }

        if !fast && ctx.session.mx_used.is_some() {
            let (points, detail) = heuristics::tls_certificate(&ctx.session);
            details.push(
                "tls_certificate",
                points,
                ProbeDetail::TlsCertificate(detail),
            );
        }

        if !fast && !ctx.mx_hosts.is_empty() && !ctx.expired() {
            let (points, detail) = ancillary::mail_ports(&ctx.mx_hosts[0]).await;
            details.push("mail_ports", points, ProbeDetail::MailPorts(detail));
        }

        // The DNS-side extended probes are independent of the SMTP
        // session; compute them concurrently here and merge each result
        // at its declared position below.
        let dns_extended = if !fast && !ctx.expired() {
            Some(self.dns_extended(&ctx).await)
        } else {
            None
        };

        if let Some(extended) = &dns_extended {
            let (points, detail) = extended.dnssec.clone();
            details.push("dnssec", points, ProbeDetail::Dnssec(detail));
            if let Some((points, detail)) = extended.ptr.clone() {
                details.push("ptr_record", points, ProbeDetail::PtrRecord(detail));
            }
            if let Some(scored) = extended.ip_reputation.clone() {
                details.push(
                    "ip_reputation",
                    scored.points,
                    ProbeDetail::IpReputation(scored.detail),
                );
            }
        }

        if ctx.session.mx_used.is_some() {
            let (points, detail) = heuristics::server_behavior(&ctx.session, &ctx.rcpt);
            details.push(
                "server_behavior",
                points,
                ProbeDetail::ServerBehavior(detail),
            );
        }

        if let Some(mx) = ctx.mx_hosts.first() {
            let scored = dns::mx_popularity(self, &ctx.domain, mx);
            details.push(
                "mx_popularity",
                scored.points,
                ProbeDetail::MxPopularity(scored.detail),
            );
        }

        let (points, detail) = heuristics::blocklist_behavior(&ctx.rcpt, &ctx.session);
        details.push(
            "blocklist_behavior",
            points,
            ProbeDetail::BlocklistBehavior(detail),
        );

        if let Some(extended) = &dns_extended {
            if let Some((points, detail)) = extended.consistency.clone() {
                details.push(
                    "mx_consistency",
                    points,
                    ProbeDetail::MxConsistency(detail),
                );
            }
        }

        if !fast && ctx.session.mx_used.is_some() {
            let (points, detail) = heuristics::tls_policy(&ctx.session);
            details.push("tls_policy", points, ProbeDetail::TlsPolicy(detail));
        }

        if !fast {
            let (points, detail) = dns::mx_redundancy(&ctx.mx_hosts);
            details.push("mx_redundancy", points, ProbeDetail::MxRedundancy(detail));
        }

        if !fast && ctx.session.mx_used.is_some() {
            let (points, detail) = heuristics::smtp_strictness(&ctx.session, &ctx.rcpt);
            details.push(
                "smtp_strictness",
                points,
                ProbeDetail::SmtpStrictness(detail),
            );
        }

        if !fast && ctx.session.mx_used.is_some() && !ctx.expired() {
            let (points, detail) =
                ancillary::mailfrom_health(self, &ctx.session, &ctx.mx_hosts).await;
            details.push(
                "mailfrom_health",
                points,
                ProbeDetail::MailFromHealth(detail),
            );
        }

        if !fast && ctx.session.mx_used.is_some() {
            let (points, detail) = heuristics::latency_fingerprint(&ctx.rcpt);
            details.push(
                "latency_fingerprint",
                points,
                ProbeDetail::LatencyFingerprint(detail),
            );
        }

        if !fast && ctx.mx_hosts.len() > 1 && !ctx.expired() {
            let (points, detail) = ancillary::loadbalancer(self, &ctx.email, &ctx.mx_hosts).await;
            details.push("loadbalancer", points, ProbeDetail::LoadBalancer(detail));
        }

        if !fast && ctx.session.mx_used.is_some() && !ctx.expired() {
            let (points, detail) =
                ancillary::vrfy_lite(self, &ctx.email, &ctx.domain, &ctx.session, &ctx.mx_hosts)
                    .await;
            details.push("vrfy_lite", points, ProbeDetail::VrfyLite(detail));
        }

        if !fast && !ctx.mx_hosts.is_empty() && !ctx.expired() {
            let (points, detail) = ancillary::role_accounts(self, &ctx.domain, &ctx.mx_hosts).await;
            details.push("role_accounts", points, ProbeDetail::RoleAccounts(detail));
        }

        if !fast {
            if let Some(mx) = ctx.mx_hosts.first() {
                let (points, detail) = dns::mx_brand(mx);
                details.push("mx_brand", points, ProbeDetail::MxBrand(detail));
            }
        }

        if !fast && ctx.rcpt.soft_failure && !ctx.expired() {
            let (points, detail) = ancillary::greylist_depth(self, &ctx.email, &ctx.mx_hosts).await;
            details.push("greylist_depth", points, ProbeDetail::GreylistDepth(detail));
        }

        if !ctx.session.greeting.raw.is_empty() {
            let (points, detail) = heuristics::smtp_banner(&ctx.session.greeting.raw);
            details.push("smtp_banner", points, ProbeDetail::SmtpBanner(detail));
        }

        if let Some(extended) = dns_extended {
            let (points, detail) = extended.blacklists;
            details.push(
                "domain_blacklists",
                points,
                ProbeDetail::DomainBlacklists(detail),
            );
        }

        if !fast && !ctx.expired() {
            if let Some(mx) = ctx.session.mx_used.clone() {
                let (points, detail) = ancillary::quit_behavior(self, &mx).await;
                details.push("quit_behavior", points, ProbeDetail::QuitBehavior(detail));

                let (points, detail) = ancillary::tcp_stability(self, &mx).await;
                details.push("tcp_stability", points, ProbeDetail::TcpStability(detail));
            }
        }

        let mut is_catchall = false;
        if !fast && !ctx.expired() {
            let (catchall, detail) = ancillary::catch_all(self, &ctx.domain, &ctx.session).await;
            is_catchall = catchall;
            details.push("catch_all", 0, ProbeDetail::CatchAll(detail));
        }

        self.finalize(ctx, options, details, is_catchall).await
    }

    async fn finalize(
        &self,
        ctx: VerifyCtx,
        options: &VerifyOptions,
        mut details: Details,
        is_catchall: bool,
    ) -> VerifyReport {
        let mut score = details.total_points();

        // A hard RCPT failure dominates everything accumulated so far.
        if ctx.rcpt.hard_failure {
            score = score.min(10);
        }

        // Provider cap: when the provider is known to block or blindly
        // accept verification, an unconfirmed RCPT cannot push the score
        // past the provider's ceiling.
        let mut rule_detail = ProviderRuleDetail::default();
        if let Some((suffix, rule)) = PROVIDER_RULES.get_with_suffix(&ctx.domain) {
            rule_detail.provider = Some(suffix.clone());
            rule_detail.rule_applied = true;
            if !ctx.rcpt.accepted {
                let max = rule.max_score_without_rcpt as i32;
                if score > max {
                    rule_detail.score_adjusted = true;
                    rule_detail.adjusted_score = Some(max);
                    rule_detail.reason = Some(format!(
                        "Provider {suffix} blocks verification, max score without RCPT: {max}"
                    ));
                    score = max;
                }
            }
            if rule.reliable_rejections && ctx.rcpt.rejected {
                rule_detail.reliable_rejection = true;
            }
        }
        details.push("provider_rules", 0, ProbeDetail::ProviderRules(rule_detail));

        let mut risky = false;
        if is_catchall {
            score += 10;
            risky = true;
        }

        let score = score.clamp(0, 100) as u8;
        let status = Status::from_score(score);
        let mut report = VerifyReport {
            email: ctx.email.clone(),
            status,
            score,
            confidence: score as f64 / 100.0,
            reason: status.reason().to_string(),
            risky,
            details,
        };

        if options.internet_checks || self.config.enable_internet_checks {
            let payload = match self.enricher.enrich(&ctx.email, self.config.enable_hibp).await {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::debug!("presence enrichment for {} failed: {err:#}", ctx.email);
                    serde_json::json!({
                        "error": err.to_string(),
                        "error_kind": crate::errors::ErrorKind::AdapterFailure,
                    })
                }
            };
            report.details.internet_check = Some(payload);
        }

        // Per-domain overrides win over everything else.
        if let Some(domain_override) = self.config.overrides.get(&ctx.domain) {
            if let Some(min_score) = domain_override.min_score {
                if report.score < min_score {
                    report.score = min_score;
                    report.confidence = report.score as f64 / 100.0;
                }
            }
            if let Some(force_status) = domain_override.force_status {
                report.status = force_status;
            }
        }

        report
    }

    async fn dns_extended(&self, ctx: &VerifyCtx) -> DnsExtended {
        match ctx.mx_hosts.first() {
            Some(mx) => {
                let (dnssec, ptr, ip_reputation, consistency, blacklists) = tokio::join!(
                    dns::dnssec(self, &ctx.domain),
                    dns::ptr_record(self, mx),
                    dns::ip_reputation(self, mx),
                    dns::mx_consistency(self, mx),
                    dns::domain_blacklists(self, &ctx.domain),
                );
                DnsExtended {
                    dnssec,
                    ptr: Some(ptr),
                    ip_reputation: Some(ip_reputation),
                    consistency: Some(consistency),
                    blacklists,
                }
            }
            None => {
                let (dnssec, blacklists) = tokio::join!(
                    dns::dnssec(self, &ctx.domain),
                    dns::domain_blacklists(self, &ctx.domain),
                );
                DnsExtended {
                    dnssec,
                    ptr: None,
                    ip_reputation: None,
                    consistency: None,
                    blacklists,
                }
            }
        }
    }
}

struct DnsExtended {
    dnssec: (i32, DnssecDetail),
    ptr: Option<(i32, PtrDetail)>,
    ip_reputation: Option<Scored<IpReputationDetail>>,
    consistency: Option<(i32, MxConsistencyDetail)>,
    blacklists: (i32, DomainBlacklistsDetail),
}
