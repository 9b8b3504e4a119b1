//! Per-verification working state. A context is created for each input
//! address and discarded once the verdict has been emitted; only the
//! caches outlive it.

use smtp_probe::TlsPeerInfo;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Greeting {
    pub code: Option<u16>,
    pub raw: String,
    pub valid: bool,
}

/// What the SMTP session probe learned about the preferred MX.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub skipped: bool,
    pub mx_used: Option<String>,
    pub port25_open: bool,
    pub greeting: Greeting,
    pub ehlo_extensions: BTreeSet<String>,
    pub tls_upgraded: bool,
    pub tls_cert: Option<TlsPeerInfo>,
    pub error: Option<String>,
}

/// Outcome of the RCPT dialogue. At most one of `accepted`, `rejected`
/// and `soft_failure` is set; none of them is set on a transport error.
#[derive(Debug, Clone, Default)]
pub struct RcptSnapshot {
    pub skipped: bool,
    pub accepted: bool,
    pub rejected: bool,
    pub hard_failure: bool,
    pub soft_failure: bool,
    pub response_code: Option<u16>,
    pub rcpt_latency: Option<Duration>,
    pub error: Option<String>,
}

pub(crate) struct VerifyCtx {
    pub email: String,
    pub domain: String,
    pub mx_hosts: Vec<String>,
    pub session: SessionSnapshot,
    pub rcpt: RcptSnapshot,
    pub fast_mode: bool,
    pub deadline: Instant,
}

impl VerifyCtx {
    pub fn new(email: &str, fast_mode: bool, budget: Duration) -> Self {
        // The domain is case-normalised; the local part stays untouched
        // inside `email` for RCPT.
        let domain = match email.split_once('@') {
            Some((_, domain)) => domain.to_ascii_lowercase(),
            None => String::new(),
        };
        Self {
            email: email.to_string(),
            domain,
            mx_hosts: vec![],
            session: SessionSnapshot::default(),
            rcpt: RcptSnapshot::default(),
            fast_mode,
            deadline: Instant::now() + budget,
        }
    }

    /// True once the cooperative deadline has passed; remaining probes
    /// should skip and let the verification finalise.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
