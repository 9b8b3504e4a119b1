//! The error taxonomy surfaced in probe details. Probe failures are data,
//! not control flow: they are recorded in the owning probe's report and
//! never raised to the orchestrator.

use dns_probe::{Answer, DnsError};
use serde::Serialize;
use smtp_probe::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportTimeout,
    TransportRefused,
    TransportReset,
    DnsNxdomain,
    DnsNoanswer,
    DnsServfail,
    TlsFailure,
    ProtocolUnexpected,
    ProviderBlocked,
    AdapterFailure,
}

pub(crate) fn classify_transport_error(err: &ClientError) -> ErrorKind {
    match err {
        ClientError::TimeOutConnect { .. }
        | ClientError::TimeOutRequest { .. }
        | ClientError::TimeOutResponse { .. } => ErrorKind::TransportTimeout,
        ClientError::ConnectError { error, .. } if error.contains("refused") => {
            ErrorKind::TransportRefused
        }
        ClientError::ConnectError { .. } => ErrorKind::TransportReset,
        ClientError::ReadError { error, .. } | ClientError::WriteError { error, .. }
            if error.contains("reset") =>
        {
            ErrorKind::TransportReset
        }
        ClientError::ReadError { .. } | ClientError::WriteError { .. } | ClientError::FlushError { .. } => {
            ErrorKind::TransportReset
        }
        ClientError::SslErrorStack(_) | ClientError::InvalidDnsName(_) => ErrorKind::TlsFailure,
        ClientError::Utf8(_)
        | ClientError::MalformedResponseLine(_)
        | ClientError::ResponseTooLong
        | ClientError::NotConnected
        | ClientError::Rejected(_) => ErrorKind::ProtocolUnexpected,
    }
}

/// Interpret a DNS answer that carried no usable records.
pub(crate) fn classify_dns_answer(answer: &Answer) -> ErrorKind {
    if answer.nxdomain {
        ErrorKind::DnsNxdomain
    } else {
        ErrorKind::DnsNoanswer
    }
}

pub(crate) fn classify_dns_error(err: &DnsError) -> ErrorKind {
    match err {
        DnsError::InvalidName(_) => ErrorKind::DnsNoanswer,
        DnsError::ResolveFailed(msg) if msg.contains("timed out") => ErrorKind::TransportTimeout,
        DnsError::ResolveFailed(_) => ErrorKind::DnsServfail,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeouts_classify_as_transport_timeout() {
        let err = ClientError::TimeOutConnect {
            address: "mx.example.com:25".to_string(),
            duration: Duration::from_secs(3),
        };
        assert_eq!(classify_transport_error(&err), ErrorKind::TransportTimeout);
    }

    #[test]
    fn refused_connections() {
        let err = ClientError::ConnectError {
            address: "mx.example.com:25".to_string(),
            error: "Connection refused (os error 111)".to_string(),
        };
        assert_eq!(classify_transport_error(&err), ErrorKind::TransportRefused);
    }

    #[test]
    fn serialization_matches_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::DnsNxdomain).unwrap(),
            "\"dns_nxdomain\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ProviderBlocked).unwrap(),
            "\"provider_blocked\""
        );
    }
}
