//! The RCPT probe, the heart of the verifier: a full MAIL FROM / RCPT TO
//! dialogue against the MX the session probe settled on, with the reply
//! code and round-trip latency interpreted into deliverability signals.

use crate::context::{RcptSnapshot, SessionSnapshot};
use crate::engine::Verifier;
use crate::errors::{classify_transport_error, ErrorKind};
use smtp_probe::{ClientError, EnhancedStatusCode, Response, SmtpClient, SmtpTimeouts};
use std::time::{Duration, Instant};

/// One short-lived MAIL/RCPT dialogue. Every recipient-level probe
/// (retries, catch-all detection, role accounts, the load-balancer
/// cross-check) goes through this shape.
pub(crate) struct Dialogue {
    client: SmtpClient,
}

impl Dialogue {
    pub async fn open(
        verifier: &Verifier,
        mx: &str,
        timeouts: SmtpTimeouts,
    ) -> Result<Self, ClientError> {
        let mut client = SmtpClient::connect(mx, verifier.config.smtp_port, timeouts).await?;
        let greeting = client.read_greeting().await?;
        if greeting.code != 220 {
            return Err(ClientError::Rejected(greeting));
        }
        client.ehlo_or_helo(&verifier.config.sender_domain).await?;
        Ok(Self { client })
    }

    pub fn probe_sender(verifier: &Verifier) -> String {
        format!("verify@{}", verifier.config.sender_domain)
    }

    pub async fn mail_from(&mut self, address: &str) -> Result<Response, ClientError> {
        self.client.mail_from(address).await
    }

    pub async fn rcpt_to(&mut self, address: &str) -> Result<(Response, Duration), ClientError> {
        let start = Instant::now();
        let response = self.client.rcpt_to(address).await?;
        Ok((response, start.elapsed()))
    }

    pub async fn noop(&mut self) -> Result<Response, ClientError> {
        self.client.noop().await
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.client.has_capability(name)
    }

    pub async fn quit(mut self) -> Option<Response> {
        self.client.quit().await.ok()
    }
}

pub(crate) struct RcptOutcome {
    pub snapshot: RcptSnapshot,
    pub points: i32,
    pub timing_points: i32,
    pub error_kind: Option<ErrorKind>,
}

impl RcptOutcome {
    fn skipped() -> Self {
        Self {
            snapshot: RcptSnapshot {
                skipped: true,
                ..RcptSnapshot::default()
            },
            points: 0,
            timing_points: 0,
            error_kind: None,
        }
    }
}

/// Latency interpretation for the RCPT round trip: an instant reply is
/// the signature of a reject-everything or accept-everything endpoint.
pub(crate) fn score_rcpt_timing(latency: Duration) -> i32 {
    let secs = latency.as_secs_f64();
    if secs < 1.0 {
        -10
    } else if secs > 15.0 {
        -5
    } else {
        5
    }
}

pub(crate) async fn smtp_rcpt(
    verifier: &Verifier,
    email: &str,
    session: &SessionSnapshot,
    fast: bool,
) -> RcptOutcome {
    if session.skipped {
        // The session probe only skips for providers known to block
        // verification probes.
        let mut outcome = RcptOutcome::skipped();
        outcome.error_kind = Some(ErrorKind::ProviderBlocked);
        return outcome;
    }
    if !session.port25_open {
        return RcptOutcome::skipped();
    }
    let Some(mx) = session.mx_used.clone() else {
        return RcptOutcome::skipped();
    };

    let timeouts = crate::probes::session::session_timeouts(fast);
    let mut snapshot = RcptSnapshot::default();
    let mut points = 0;
    let mut timing_points = 0;
    let mut error_kind = None;

    match rcpt_dialogue(verifier, &mx, timeouts, email).await {
        Ok(Some((response, latency))) => {
            snapshot.rcpt_latency = Some(latency);
            snapshot.response_code = Some(response.code);
            match response.code {
                250 | 251 => {
                    snapshot.accepted = true;
                    points += 10;
                }
                550 => {
                    snapshot.rejected = true;
                    snapshot.hard_failure = true;
                    let content = response.content.to_ascii_lowercase();
                    let user_unknown = content.contains("user unknown")
                        || content.contains("5.1.1")
                        || response.enhanced_code
                            == Some(EnhancedStatusCode {
                                class: 5,
                                subject: 1,
                                detail: 1,
                            });
                    snapshot.error = Some(if user_unknown {
                        "User unknown".to_string()
                    } else {
                        format!("Permanent SMTP error: {}", response.code)
                    });
                }
                450 | 451 => {
                    snapshot.soft_failure = true;
                    points += 10;
                    snapshot.error = Some("Temporarily unavailable (greylisted)".to_string());
                }
                421 => {
                    snapshot.soft_failure = true;
                    points += 10;
                    snapshot.error = Some("Service unavailable, try again later".to_string());
                }
                code if (500..600).contains(&code) => {
                    snapshot.rejected = true;
                    snapshot.hard_failure = true;
                    snapshot.error = Some(format!("Permanent SMTP error: {code}"));
                }
                code => {
                    snapshot.error = Some(format!("Unexpected response: {code}"));
                }
            }
            timing_points = score_rcpt_timing(latency);
        }
        Ok(None) => {
            // MAIL FROM was refused; nothing was learned about the recipient
        }
        Err(err) => {
            error_kind = Some(classify_transport_error(&err));
            snapshot.error = Some(err.to_string());
        }
    }

    RcptOutcome {
        snapshot,
        points,
        timing_points,
        error_kind,
    }
}

/// connect -> EHLO/HELO -> MAIL FROM -> RCPT TO -> QUIT.
/// The latency is measured from connect to the RCPT reply. Returns
/// `None` when MAIL FROM is not accepted.
async fn rcpt_dialogue(
    verifier: &Verifier,
    mx: &str,
    timeouts: SmtpTimeouts,
    email: &str,
) -> Result<Option<(Response, Duration)>, ClientError> {
    let started = Instant::now();
    let mut dialogue = Dialogue::open(verifier, mx, timeouts).await?;

    let sender = Dialogue::probe_sender(verifier);
    let mail = dialogue.mail_from(&sender).await?;
    if !matches!(mail.code, 250 | 251) {
        dialogue.quit().await;
        return Ok(None);
    }

    let (response, _) = dialogue.rcpt_to(email).await?;
    let latency = started.elapsed();
    dialogue.quit().await;
    Ok(Some((response, latency)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timing_buckets() {
        assert_eq!(score_rcpt_timing(Duration::from_millis(10)), -10);
        assert_eq!(score_rcpt_timing(Duration::from_millis(999)), -10);
        assert_eq!(score_rcpt_timing(Duration::from_millis(1001)), 5);
        assert_eq!(score_rcpt_timing(Duration::from_secs(15)), 5);
        assert_eq!(score_rcpt_timing(Duration::from_secs(16)), -5);
    }
}
