//! Probes that interpret what the session and RCPT probes already
//! observed: error patterns, certificate quality, server behaviour,
//! latency shapes and banner metadata. Pure functions, no I/O.

use crate::context::{RcptSnapshot, SessionSnapshot};
use crate::providers::{BANNER_PROVIDER_TOKENS, BANNER_SUSPICIOUS_TOKENS};
use crate::report::{
    BannerDetail, BlocklistBehaviorDetail, ErrorPatternDetail, LatencyFingerprintDetail,
    ServerBehaviorDetail, StrictnessChecks, StrictnessDetail, TlsCertificateDetail,
    TlsPolicyDetail,
};

/// Classify whatever error string the RCPT or session probe recorded.
pub(crate) fn error_pattern(
    rcpt: &RcptSnapshot,
    session: &SessionSnapshot,
) -> (i32, ErrorPatternDetail) {
    let error = rcpt
        .error
        .as_deref()
        .or(session.error.as_deref())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (category, points, pattern) = if error.contains("rate limit")
        || error.contains("too many")
        || error.contains("429")
    {
        ("rate_limited", 5, Some("Rate limited"))
    } else if error.contains("greylist") || error.contains("451") || error.contains("temporarily") {
        ("greylist", 10, Some("Greylisted"))
    } else if error.contains("policy") || error.contains("privacy") || error.contains("not allowed")
    {
        ("policy_block", 3, Some("Policy block"))
    } else if error.contains("refused") {
        ("connection_refused", 3, Some("Connection refused"))
    } else if error.contains("timeout")
        || error.contains("timed out")
        || error.contains("dead")
        || error.contains("no route")
    {
        ("dead_server", -20, Some("Dead server"))
    } else if error.contains("reset") {
        ("connection_reset", 0, Some("Connection reset"))
    } else {
        ("unknown", 0, None)
    };

    (points, ErrorPatternDetail { category, pattern })
}

/// Score the certificate captured during the STARTTLS upgrade.
pub(crate) fn tls_certificate(session: &SessionSnapshot) -> (i32, TlsCertificateDetail) {
    let Some(info) = &session.tls_cert else {
        return (
            0,
            TlsCertificateDetail {
                no_tls: true,
                skipped: true,
                ..TlsCertificateDetail::default()
            },
        );
    };

    let mx = session.mx_used.as_deref().unwrap_or("");
    let mut points = 0;
    let mut detail = TlsCertificateDetail::default();

    if let Some(cn) = &info.subject_common_name {
        if cn.contains(mx) || mx.contains(cn.trim_start_matches("*.")) {
            detail.domain_match = true;
            points += 5;
        }
    }

    if info.self_signed {
        detail.self_signed = true;
        points -= 10;
    } else {
        detail.reputable_ca = true;
        points += 5;
    }

    if info.expired {
        detail.expired = true;
        points -= 10;
    }

    (points, detail)
}

/// STARTTLS upgrade behaviour: did the server end up on a modern cipher,
/// or does it advertise STARTTLS it cannot complete?
pub(crate) fn tls_policy(session: &SessionSnapshot) -> (i32, TlsPolicyDetail) {
    let mut detail = TlsPolicyDetail::default();

    if session.tls_upgraded {
        detail.supports_starttls = true;
        detail.secure = true;
        let modern = session
            .tls_cert
            .as_ref()
            .map(|info| !info.cipher.is_empty())
            .unwrap_or(false);
        if modern {
            detail.modern_ciphers = true;
            (10, detail)
        } else {
            (-5, detail)
        }
    } else if session.ehlo_extensions.contains("STARTTLS") {
        detail.supports_starttls = true;
        detail.allows_downgrade = true;
        (-5, detail)
    } else {
        detail.skipped = true;
        (0, detail)
    }
}

/// Weighted strictness signals; servers that validate their side of the
/// transaction also tend to give truthful RCPT answers.
pub(crate) fn smtp_strictness(
    session: &SessionSnapshot,
    rcpt: &RcptSnapshot,
) -> (i32, StrictnessDetail) {
    let mut raw = 0;
    let mut checks = StrictnessChecks::default();
    let error = rcpt.error.as_deref().unwrap_or("").to_ascii_lowercase();

    if session.greeting.valid {
        checks.valid_ehlo = true;
        raw += 2;
    }
    if let Some(code) = rcpt.response_code {
        if !matches!(code, 250 | 251) && error.contains("mail") {
            checks.validates_mailfrom = true;
            raw += 3;
        }
    }
    if rcpt.rejected && matches!(rcpt.response_code, Some(500) | Some(501) | Some(502)) {
        checks.rejects_malformed = true;
        raw += 3;
    }
    if error.contains("spam") || error.contains("policy") || error.contains("block") {
        checks.enforces_antispam = true;
        raw += 2;
    }

    let (strictness_level, points) = if raw >= 8 {
        ("strict", 10)
    } else if raw >= 4 {
        ("moderate", 0)
    } else {
        ("loose", -5)
    };

    (
        points,
        StrictnessDetail {
            strictness_level,
            checks,
        },
    )
}

pub(crate) fn latency_fingerprint(rcpt: &RcptSnapshot) -> (i32, LatencyFingerprintDetail) {
    let secs = rcpt
        .rcpt_latency
        .map(|latency| latency.as_secs_f64())
        .unwrap_or(0.0);

    let (pattern, points) = if secs < 0.5 {
        ("instant_reject", -10)
    } else if secs <= 3.0 {
        ("normal", 8)
    } else if secs <= 10.0 {
        ("slow", 0)
    } else {
        ("very_slow", -5)
    };

    (
        points,
        LatencyFingerprintDetail {
            rcpt_latency_sec: (secs * 100.0).round() / 100.0,
            pattern,
        },
    )
}

/// Aggregate behaviour heuristics, clamped to [-5, 15].
pub(crate) fn server_behavior(
    session: &SessionSnapshot,
    rcpt: &RcptSnapshot,
) -> (i32, ServerBehaviorDetail) {
    let mut points = 0;
    let mut detail = ServerBehaviorDetail::default();

    if session.greeting.valid {
        detail.allows_ehlo = true;
        points += 3;
    }
    if session.tls_upgraded {
        detail.supports_starttls = true;
        points += 5;
    }

    let response_time = rcpt
        .rcpt_latency
        .map(|latency| latency.as_secs_f64())
        .unwrap_or(0.0);
    if response_time > 0.0 && response_time < 1.0 {
        detail.normal_response = true;
        points += 2;
    } else if response_time > 5.0 {
        detail.slow_response = true;
        points -= 2;
    }

    (points.clamp(-5, 15), detail)
}

/// Indirect blocklist signals read from how the transaction failed.
pub(crate) fn blocklist_behavior(
    rcpt: &RcptSnapshot,
    session: &SessionSnapshot,
) -> (i32, BlocklistBehaviorDetail) {
    if rcpt.rejected {
        let error = rcpt.error.as_deref().unwrap_or("").to_ascii_lowercase();
        if error.contains("user unknown") || rcpt.response_code == Some(550) {
            return (
                5,
                BlocklistBehaviorDetail {
                    behavior: "instant_reject",
                    note: Some("Server instantly rejects unknown users (good sign)"),
                },
            );
        }
    } else if rcpt.accepted {
        return (
            0,
            BlocklistBehaviorDetail {
                behavior: "accepts",
                note: None,
            },
        );
    } else if rcpt.soft_failure {
        return (
            3,
            BlocklistBehaviorDetail {
                behavior: "greylist",
                note: None,
            },
        );
    } else if let Some(error) = &session.error {
        let error = error.to_ascii_lowercase();
        if error.contains("timeout") || error.contains("timed out") {
            return (
                -3,
                BlocklistBehaviorDetail {
                    behavior: "timeout",
                    note: None,
                },
            );
        }
        if error.contains("policy") {
            return (
                2,
                BlocklistBehaviorDetail {
                    behavior: "policy_block",
                    note: None,
                },
            );
        }
    }

    (
        0,
        BlocklistBehaviorDetail {
            behavior: "unknown",
            note: None,
        },
    )
}

/// Inspect the greeting banner for provider metadata.
pub(crate) fn smtp_banner(banner: &str) -> (i32, BannerDetail) {
    let banner_lower = banner.to_ascii_lowercase();

    for &token in BANNER_PROVIDER_TOKENS {
        if banner_lower.contains(token) {
            return (
                8,
                BannerDetail {
                    has_metadata: true,
                    provider_identified: true,
                    professional: true,
                    identified_provider: Some(token),
                },
            );
        }
    }

    for &token in BANNER_SUSPICIOUS_TOKENS {
        if banner_lower.contains(token) {
            return (-8, BannerDetail::default());
        }
    }

    if banner.trim().len() < 10 {
        (-8, BannerDetail::default())
    } else {
        (0, BannerDetail::default())
    }
}
