//! Scores the likely deliverability of an email address without sending
//! mail to it: DNS health, SMTP reachability, transport security posture,
//! recipient-level protocol responses, blacklist membership and web
//! presence are combined into a bounded score in `[0, 100]` and mapped to
//! a verdict bucket.

pub mod caches;
pub mod config;
pub mod context;
pub mod engine;
pub mod enrich;
pub mod errors;
pub mod providers;
mod probes;
pub mod report;

pub use caches::Caches;
pub use config::{DomainOverride, VerifierConfig};
pub use engine::Verifier;
pub use enrich::{NoopEnricher, PresenceEnricher};
pub use errors::ErrorKind;
pub use report::{
    ConfidenceMode, Details, ProbeDetail, ProbeReport, Status, VerifyOptions, VerifyReport,
};
