//! Extended probes that open their own short SMTP dialogues against the
//! MX the session probe settled on: capability fingerprinting, greylist
//! retries, sender-validation checks, cross-MX consistency, catch-all
//! detection and connection stability.

use crate::caches::Scored;
use crate::context::SessionSnapshot;
use crate::engine::Verifier;
use crate::probes::rcpt::Dialogue;
use crate::report::{
    CatchAllDetail, FingerprintDetail, GreylistDepthDetail, LoadBalancerDetail,
    LoadBalancerResponse, MailFromHealthDetail, MailPortsDetail, QuitDetail, RetryAttempt,
    RetryDetail, RoleAccountProbe, RoleAccountsDetail, TcpStabilityDetail, VrfyLiteDetail,
};
use crate::providers::ROLE_ACCOUNTS;
use rand::seq::SliceRandom;
use rand::Rng;
use smtp_probe::SmtpTimeouts;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const FINGERPRINT_EXTENSIONS: &[&str] = &["PIPELINING", "8BITMIME", "SIZE", "STARTTLS"];
const MAIL_PORTS: &[u16] = &[25, 465, 587, 2525];
const RETRY_DELAYS_SECS: &[u64] = &[0, 2];
const GREYLIST_ATTEMPTS: u32 = 3;
const GREYLIST_SPACING: Duration = Duration::from_secs(2);
const STABILITY_ATTEMPTS: u32 = 3;

fn probe_mx(session: &SessionSnapshot, mx_hosts: &[String]) -> Option<String> {
    session
        .mx_used
        .clone()
        .or_else(|| mx_hosts.first().cloned())
}

/// EHLO extension fingerprint of the provider. Cached per domain.
pub(crate) async fn provider_fingerprint(
    verifier: &Verifier,
    domain: &str,
    session: &SessionSnapshot,
    mx_hosts: &[String],
) -> Scored<FingerprintDetail> {
    if let Some(cached) = verifier.caches.provider_fingerprint.get(domain) {
        return cached;
    }

    let skipped = || Scored {
        points: 0,
        detail: FingerprintDetail {
            skipped: true,
            ..FingerprintDetail::default()
        },
    };

    if session.skipped {
        return skipped();
    }
    let Some(mx) = probe_mx(session, mx_hosts) else {
        return skipped();
    };

    let scored = match fingerprint_dialogue(verifier, &mx).await {
        Ok(scored) => scored,
        Err(err) => {
            tracing::debug!("fingerprint dialogue with {mx} failed: {err}");
            Scored {
                points: 0,
                detail: FingerprintDetail {
                    error: Some(err.to_string()),
                    ..FingerprintDetail::default()
                },
            }
        }
    };

    verifier.caches.provider_fingerprint.insert(
        domain.to_string(),
        scored.clone(),
        verifier.caches.ttl(),
    );
    scored
}

async fn fingerprint_dialogue(
    verifier: &Verifier,
    mx: &str,
) -> Result<Scored<FingerprintDetail>, smtp_probe::ClientError> {
    let mut dialogue = Dialogue::open(verifier, mx, SmtpTimeouts::default()).await?;

    let mut detail = FingerprintDetail::default();
    let mut count = 0;
    for &extension in FINGERPRINT_EXTENSIONS {
        let advertised = dialogue.has_capability(extension);
        detail.capabilities.insert(extension, advertised);
        if advertised {
            count += 1;
        }
    }

    let mut points = match count {
        3.. => 10,
        2 => 5,
        1 => 2,
        _ => 0,
    };
    detail.reliability_boost = points;

    // A server that drops us right after EHLO is a bad sign
    match dialogue.noop().await {
        Ok(_) => detail.early_close = Some(false),
        Err(_) => {
            detail.early_close = Some(true);
            points = (points - 3).max(0);
        }
    }

    dialogue.quit().await;
    Ok(Scored { points, detail })
}

/// Reissue RCPT after short delays; greylisting yields to persistence.
pub(crate) async fn smtp_retry(
    verifier: &Verifier,
    email: &str,
    mx_hosts: &[String],
) -> (i32, RetryDetail) {
    let mut detail = RetryDetail::default();
    let Some(mx) = mx_hosts.first() else {
        detail.skipped = true;
        return (0, detail);
    };

    for &delay in RETRY_DELAYS_SECS {
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        match single_rcpt(verifier, mx, email).await {
            Ok((code, _latency)) => {
                let success = matches!(code, 250 | 251);
                detail.retries.push(RetryAttempt {
                    delay_secs: delay,
                    code: Some(code),
                    error: None,
                    success,
                });
                if success {
                    detail.success_after_retry = true;
                    return (20, detail);
                }
            }
            Err(err) => {
                detail.retries.push(RetryAttempt {
                    delay_secs: delay,
                    code: None,
                    error: Some(err.to_string()),
                    success: false,
                });
            }
        }
    }

    (0, detail)
}

async fn single_rcpt(
    verifier: &Verifier,
    mx: &str,
    address: &str,
) -> Result<(u16, Duration), smtp_probe::ClientError> {
    let mut dialogue = Dialogue::open(verifier, mx, SmtpTimeouts::default()).await?;
    let sender = Dialogue::probe_sender(verifier);
    dialogue.mail_from(&sender).await?;
    let (response, latency) = dialogue.rcpt_to(address).await?;
    dialogue.quit().await;
    Ok((response.code, latency))
}

/// Scan the well-known mail submission ports.
pub(crate) async fn mail_ports(mx_host: &str) -> (i32, MailPortsDetail) {
    let mut detail = MailPortsDetail::default();
    let mut points = 0;

    for &port in MAIL_PORTS {
        let connect = TcpStream::connect((mx_host, port));
        if let Ok(Ok(stream)) = timeout(Duration::from_secs(1), connect).await {
            drop(stream);
            detail.open_ports.push(port);
            points += 2;
        }
    }

    (points, detail)
}

/// Offer a MAIL FROM at a throwaway domain; a server that takes it will
/// take anything.
pub(crate) async fn mailfrom_health(
    verifier: &Verifier,
    session: &SessionSnapshot,
    mx_hosts: &[String],
) -> (i32, MailFromHealthDetail) {
    let mut detail = MailFromHealthDetail::default();
    let Some(mx) = probe_mx(session, mx_hosts) else {
        detail.skipped = true;
        return (0, detail);
    };

    let fake_domain = format!("test-{}.invalid", rand::thread_rng().gen_range(10000..=99999));
    let fake_sender = format!("test@{fake_domain}");

    let mut dialogue = match Dialogue::open(verifier, &mx, SmtpTimeouts::default()).await {
        Ok(dialogue) => dialogue,
        Err(err) => {
            tracing::debug!("MAIL FROM health dialogue with {mx} failed: {err}");
            detail.skipped = true;
            return (0, detail);
        }
    };

    let points = match dialogue.mail_from(&fake_sender).await {
        Ok(response) if !matches!(response.code, 250 | 251) => {
            detail.rejects_rare_domain = true;
            7
        }
        Ok(_) => {
            detail.accepts_anything = true;
            -7
        }
        Err(err) => {
            tracing::debug!("MAIL FROM health check error: {err}");
            0
        }
    };
    dialogue.quit().await;

    (points, detail)
}

/// Cross-check the RCPT verdict against the second MX.
pub(crate) async fn loadbalancer(
    verifier: &Verifier,
    email: &str,
    mx_hosts: &[String],
) -> (i32, LoadBalancerDetail) {
    let mut detail = LoadBalancerDetail::default();
    if mx_hosts.len() < 2 {
        detail.skipped = true;
        return (0, detail);
    }

    for mx in mx_hosts.iter().take(2) {
        match single_rcpt(verifier, mx, email).await {
            Ok((code, _)) => detail.responses.push(LoadBalancerResponse {
                mx: mx.clone(),
                code: Some(code),
                error: None,
            }),
            Err(err) => detail.responses.push(LoadBalancerResponse {
                mx: mx.clone(),
                code: None,
                error: Some(err.to_string()),
            }),
        }
    }

    let codes: Vec<u16> = detail.responses.iter().filter_map(|r| r.code).collect();
    let points = if codes.len() >= 2 {
        if codes.iter().all(|code| *code == codes[0]) {
            detail.consistent = true;
            5
        } else {
            -10
        }
    } else {
        0
    };

    (points, detail)
}

/// Compare the reply for a degenerate `RCPT TO:<@domain>` against the
/// real address; identical answers suggest nobody is checked.
pub(crate) async fn vrfy_lite(
    verifier: &Verifier,
    email: &str,
    domain: &str,
    session: &SessionSnapshot,
    mx_hosts: &[String],
) -> (i32, VrfyLiteDetail) {
    let mut detail = VrfyLiteDetail::default();
    let Some(mx) = probe_mx(session, mx_hosts) else {
        detail.skipped = true;
        return (0, detail);
    };

    let result: Result<(u16, u16), smtp_probe::ClientError> = async {
        let mut dialogue = Dialogue::open(verifier, &mx, SmtpTimeouts::default()).await?;
        let sender = Dialogue::probe_sender(verifier);
        dialogue.mail_from(&sender).await?;
        let (domain_only, _) = dialogue.rcpt_to(&format!("@{domain}")).await?;
        let (real, _) = dialogue.rcpt_to(email).await?;
        dialogue.quit().await;
        Ok((domain_only.code, real.code))
    }
    .await;

    match result {
        Ok((domain_code, user_code)) => {
            detail.domain_response = Some(domain_code);
            detail.user_response = Some(user_code);
            if domain_code != user_code {
                detail.different_responses = true;
                (6, detail)
            } else {
                (-6, detail)
            }
        }
        Err(err) => {
            tracing::debug!("VRFY-lite dialogue with {mx} failed: {err}");
            detail.skipped = true;
            (0, detail)
        }
    }
}

/// Probe the standard role accounts; a domain that takes all of them is
/// likely accept-all, one that rejects all of them is suspicious too.
pub(crate) async fn role_accounts(
    verifier: &Verifier,
    domain: &str,
    mx_hosts: &[String],
) -> (i32, RoleAccountsDetail) {
    let mut detail = RoleAccountsDetail::default();
    let Some(mx) = mx_hosts.first() else {
        detail.skipped = true;
        return (0, detail);
    };

    let mut valid_count = 0;
    for &role in ROLE_ACCOUNTS {
        let address = format!("{role}@{domain}");
        match single_rcpt_short(verifier, mx, &address).await {
            Ok((code, _)) => {
                let valid = matches!(code, 250 | 251);
                if valid {
                    valid_count += 1;
                }
                detail.role_accounts.insert(
                    role,
                    RoleAccountProbe {
                        valid,
                        code: Some(code),
                        error: false,
                    },
                );
            }
            Err(_) => {
                detail.role_accounts.insert(
                    role,
                    RoleAccountProbe {
                        valid: false,
                        code: None,
                        error: true,
                    },
                );
            }
        }
    }

    let points = if valid_count == ROLE_ACCOUNTS.len() {
        detail.all_valid = true;
        6
    } else if valid_count == 0 {
        detail.all_invalid = true;
        -6
    } else {
        0
    };

    (points, detail)
}

async fn single_rcpt_short(
    verifier: &Verifier,
    mx: &str,
    address: &str,
) -> Result<(u16, Duration), smtp_probe::ClientError> {
    let mut dialogue = Dialogue::open(verifier, mx, SmtpTimeouts::short()).await?;
    let sender = Dialogue::probe_sender(verifier);
    dialogue.mail_from(&sender).await?;
    let (response, latency) = dialogue.rcpt_to(address).await?;
    dialogue.quit().await;
    Ok((response.code, latency))
}

/// Up to three spaced RCPT attempts: acceptance only after a retry is
/// the classic greylisting signature.
pub(crate) async fn greylist_depth(
    verifier: &Verifier,
    email: &str,
    mx_hosts: &[String],
) -> (i32, GreylistDepthDetail) {
    let mut detail = GreylistDepthDetail::default();
    let Some(mx) = mx_hosts.first() else {
        detail.skipped = true;
        return (0, detail);
    };

    let mut points = 0;
    for attempt in 0..GREYLIST_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(GREYLIST_SPACING).await;
        }

        match single_rcpt(verifier, mx, email).await {
            Ok((code, _)) => {
                let success = matches!(code, 250 | 251);
                detail.responses.push(RetryAttempt {
                    delay_secs: if attempt > 0 {
                        GREYLIST_SPACING.as_secs()
                    } else {
                        0
                    },
                    code: Some(code),
                    error: None,
                    success,
                });
                if success {
                    detail.depth = attempt + 1;
                    if attempt >= 1 {
                        detail.pattern_matches = true;
                        points = 10;
                    }
                    break;
                }
            }
            Err(err) => {
                // Greylisting MTAs often tear the session down on the
                // initial temp-reject; that still leaves the later
                // attempts worth making.
                detail.responses.push(RetryAttempt {
                    delay_secs: if attempt > 0 {
                        GREYLIST_SPACING.as_secs()
                    } else {
                        0
                    },
                    code: None,
                    error: Some(err.to_string()),
                    success: false,
                });
            }
        }
    }

    (points, detail)
}

/// Does the server acknowledge QUIT with 221?
pub(crate) async fn quit_behavior(verifier: &Verifier, mx_host: &str) -> (i32, QuitDetail) {
    let mut detail = QuitDetail::default();

    let dialogue = match Dialogue::open(verifier, mx_host, SmtpTimeouts::default()).await {
        Ok(dialogue) => dialogue,
        Err(err) => {
            tracing::debug!("QUIT behaviour dialogue with {mx_host} failed: {err}");
            detail.skipped = true;
            return (0, detail);
        }
    };

    match dialogue.quit().await {
        Some(response) if response.code == 221 => {
            detail.proper_quit = true;
            (4, detail)
        }
        _ => (-4, detail),
    }
}

/// Repeated connects as a crude stability measure.
pub(crate) async fn tcp_stability(verifier: &Verifier, mx_host: &str) -> (i32, TcpStabilityDetail) {
    let mut detail = TcpStabilityDetail::default();
    let mut stable_connections = 0;

    for _ in 0..STABILITY_ATTEMPTS {
        let connect = TcpStream::connect((mx_host, verifier.config.smtp_port));
        if let Ok(Ok(stream)) = timeout(Duration::from_secs(2), connect).await {
            drop(stream);
            stable_connections += 1;
        }
    }

    let points = if stable_connections == STABILITY_ATTEMPTS {
        detail.stable = true;
        5
    } else if stable_connections >= STABILITY_ATTEMPTS / 2 {
        0
    } else {
        detail.retransmissions_detected = true;
        -5
    };

    (points, detail)
}

/// RCPT a random local part; acceptance means the domain takes anything.
pub(crate) async fn catch_all(
    verifier: &Verifier,
    domain: &str,
    session: &SessionSnapshot,
) -> (bool, CatchAllDetail) {
    let test_address = format!("{}@{domain}", random_local_part());
    let mut detail = CatchAllDetail {
        is_catchall: false,
        test_address: test_address.clone(),
        skipped: false,
    };

    if session.skipped || !session.port25_open {
        detail.skipped = true;
        return (false, detail);
    }
    let Some(mx) = session.mx_used.clone() else {
        detail.skipped = true;
        return (false, detail);
    };

    match single_rcpt(verifier, &mx, &test_address).await {
        Ok((code, _)) if matches!(code, 250 | 251) => {
            detail.is_catchall = true;
            (true, detail)
        }
        Ok(_) => (false, detail),
        Err(err) => {
            tracing::debug!("catch-all dialogue with {mx} failed: {err}");
            detail.skipped = true;
            (false, detail)
        }
    }
}

fn random_local_part() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..15)
        .map(|_| *CHARSET.choose(&mut rng).unwrap() as char)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn random_local_parts_are_well_formed() {
        let local = random_local_part();
        assert_eq!(local.len(), 15);
        assert!(local
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(random_local_part(), random_local_part());
    }
}
