//! The SMTP session probe: port-25 reachability, greeting behaviour and
//! the EHLO/STARTTLS session against the preferred MX hosts. Produces
//! the `SessionSnapshot` every recipient-level probe depends on.

use crate::context::{Greeting, SessionSnapshot};
use crate::engine::Verifier;
use crate::providers::{SMTP_BLOCKED_PROVIDERS, TRANSACTIONAL_MX_PATTERNS};
use crate::report::{GreetingDetail, SmtpConnectionDetail};
use smtp_probe::{ClientError, Response, SmtpClient, SmtpTimeouts, TlsOptions, TlsStatus};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub(crate) struct SessionOutcome {
    pub snapshot: SessionSnapshot,
    pub connection_points: i32,
    pub greeting_points: i32,
}

impl SessionOutcome {
    fn skipped() -> Self {
        Self {
            snapshot: SessionSnapshot {
                skipped: true,
                ..SessionSnapshot::default()
            },
            connection_points: 0,
            greeting_points: 0,
        }
    }
}

pub(crate) fn connection_detail(snapshot: &SessionSnapshot) -> SmtpConnectionDetail {
    SmtpConnectionDetail {
        port_25_open: snapshot.port25_open,
        tls_successful: snapshot.tls_upgraded,
        mx_used: snapshot.mx_used.clone(),
        skipped: snapshot.skipped,
        error: snapshot.error.clone(),
    }
}

pub(crate) fn greeting_detail(snapshot: &SessionSnapshot) -> GreetingDetail {
    GreetingDetail {
        code: snapshot.greeting.code,
        message: snapshot.greeting.raw.clone(),
        valid: snapshot.greeting.valid,
    }
}

pub(crate) fn session_timeouts(fast: bool) -> SmtpTimeouts {
    if fast {
        SmtpTimeouts::short()
    } else {
        SmtpTimeouts::default()
    }
}

pub(crate) async fn smtp_session(
    verifier: &Verifier,
    domain: &str,
    mx_hosts: &[String],
    fast: bool,
) -> SessionOutcome {
    if mx_hosts.is_empty() {
        return SessionOutcome {
            snapshot: SessionSnapshot::default(),
            connection_points: 0,
            greeting_points: 0,
        };
    }

    // Probing the big consumer providers trips their anti-abuse
    // heuristics without telling us anything; same for transactional
    // sender infrastructure.
    if SMTP_BLOCKED_PROVIDERS.get(domain).is_some() {
        tracing::debug!("{domain}: provider known to block SMTP verification, skipping");
        return SessionOutcome::skipped();
    }
    for mx in mx_hosts.iter().take(2) {
        let mx_lower = mx.to_ascii_lowercase();
        if TRANSACTIONAL_MX_PATTERNS
            .iter()
            .any(|pattern| mx_lower.contains(pattern))
        {
            tracing::debug!("{domain}: transactional MX {mx}, skipping SMTP probes");
            return SessionOutcome::skipped();
        }
    }

    let connect_timeout = if fast {
        Duration::from_secs(3)
    } else {
        Duration::from_secs(5)
    };
    let timeouts = session_timeouts(fast);
    let port = verifier.config.smtp_port;

    let mut snapshot = SessionSnapshot::default();
    let mut connection_points = 0;
    let mut greeting_points = 0;

    for mx in mx_hosts.iter().take(2) {
        match timeout(connect_timeout, TcpStream::connect((mx.as_str(), port))).await {
            Ok(Ok(stream)) => drop(stream),
            _ => continue,
        }

        snapshot.port25_open = true;
        connection_points += 10;
        snapshot.mx_used = Some(mx.clone());

        // The greeting is read on its own short-lived connection so that
        // a server which stalls after the banner cannot poison the
        // session below.
        match read_greeting_once(mx, port, timeouts).await {
            Ok(response) => {
                let banner = response.content.lines().next().unwrap_or("").to_string();
                let valid = response.code == 220;
                snapshot.greeting = Greeting {
                    code: Some(response.code),
                    raw: format!("{} {banner}", response.code),
                    valid,
                };
                greeting_points += if valid { 10 } else { -10 };
            }
            Err(err) => {
                tracing::debug!("greeting read from {mx} failed: {err}");
                snapshot.greeting = Greeting::default();
                snapshot.error = Some(err.to_string());
                greeting_points -= 10;
            }
        }

        match SmtpClient::connect(mx, port, timeouts).await {
            Ok(mut client) => {
                if let Err(err) = run_ehlo_session(verifier, &mut client, &mut snapshot, fast).await
                {
                    tracing::debug!("EHLO session with {mx} failed: {err}");
                    snapshot.error = Some(err.to_string());
                } else if snapshot.tls_upgraded {
                    connection_points += 5;
                }
                let _ = client.quit().await;
            }
            Err(err) => {
                snapshot.error = Some(err.to_string());
            }
        }

        break;
    }

    SessionOutcome {
        snapshot,
        connection_points,
        greeting_points,
    }
}

async fn read_greeting_once(
    mx: &str,
    port: u16,
    timeouts: SmtpTimeouts,
) -> Result<Response, ClientError> {
    let mut client = SmtpClient::connect(mx, port, timeouts).await?;
    client.read_greeting().await
}

async fn run_ehlo_session(
    verifier: &Verifier,
    client: &mut SmtpClient,
    snapshot: &mut SessionSnapshot,
    fast: bool,
) -> Result<(), ClientError> {
    client.read_greeting().await?;
    client.ehlo(&verifier.config.sender_domain).await?;
    snapshot.ehlo_extensions = client.capabilities().keys().cloned().collect();

    if !fast && client.has_capability("STARTTLS") {
        // The handshake runs unverified: certificate quality is scored
        // by its own probe, not used to gate the upgrade.
        match client.starttls(TlsOptions { insecure: true }).await? {
            TlsStatus::Info(info) => {
                snapshot.tls_upgraded = true;
                snapshot.tls_cert = Some(info);
                // Refresh the capability view over the encrypted channel
                let _ = client.ehlo(&verifier.config.sender_domain).await;
            }
            TlsStatus::FailedHandshake(err) => {
                tracing::debug!("STARTTLS handshake failed: {err}");
            }
        }
    }

    Ok(())
}
