//! Domain age via RDAP registration events. Registries that expose no
//! RDAP data simply yield a skipped probe.

use crate::caches::Scored;
use crate::engine::Verifier;
use crate::report::DomainAgeDetail;
use anyhow::Context;
use chrono::{DateTime, Utc};

pub(crate) async fn domain_age(verifier: &Verifier, domain: &str) -> Scored<DomainAgeDetail> {
    if let Some(cached) = verifier.caches.domain_age.get(domain) {
        return cached;
    }

    let scored = match registration_date(verifier, domain).await {
        Ok(registered) => {
            let age_days = (Utc::now() - registered).num_days();
            let age_months = age_days as f64 / 30.0;
            let points = if age_months < 1.0 {
                -15
            } else if age_months < 12.0 {
                0
            } else {
                10
            };
            Scored {
                points,
                detail: DomainAgeDetail {
                    age_months: Some((age_months * 10.0).round() / 10.0),
                    skipped: false,
                },
            }
        }
        Err(err) => {
            tracing::debug!("registration date lookup for {domain} failed: {err:#}");
            Scored {
                points: 0,
                detail: DomainAgeDetail {
                    age_months: None,
                    skipped: true,
                },
            }
        }
    };

    verifier.caches.domain_age.insert(
        domain.to_string(),
        scored.clone(),
        verifier.caches.ttl(),
    );
    scored
}

async fn registration_date(verifier: &Verifier, domain: &str) -> anyhow::Result<DateTime<Utc>> {
    let url = format!("{}/domain/{domain}", verifier.config.rdap_base_url);
    let text = verifier
        .http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()?
        .text()
        .await
        .context("reading RDAP body")?;
    let body: serde_json::Value = serde_json::from_str(&text).context("parsing RDAP body")?;

    let events = body["events"]
        .as_array()
        .context("RDAP body has no events")?;
    let event_date = events
        .iter()
        .find(|event| event["eventAction"].as_str() == Some("registration"))
        .and_then(|event| event["eventDate"].as_str())
        .context("no registration event")?;

    let registered = DateTime::parse_from_rfc3339(event_date)
        .with_context(|| format!("parsing eventDate {event_date}"))?;
    Ok(registered.with_timezone(&Utc))
}
