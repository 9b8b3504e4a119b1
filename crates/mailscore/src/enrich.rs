//! Seam for optional external-presence enrichment (breach-database
//! lookups, web/social presence). The engine calls the adapter once per
//! address and merges whatever it returns under `details.internet_check`;
//! adapter failures are captured there and never affect the score.

use async_trait::async_trait;

#[async_trait]
pub trait PresenceEnricher: Send + Sync + 'static {
    async fn enrich(&self, email: &str, enable_hibp: bool) -> anyhow::Result<serde_json::Value>;
}

/// The default adapter: reports that enrichment did not run.
pub struct NoopEnricher;

#[async_trait]
impl PresenceEnricher for NoopEnricher {
    async fn enrich(&self, _email: &str, _enable_hibp: bool) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "skipped": true }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn noop_reports_skipped() {
        let payload = NoopEnricher.enrich("user@example.com", true).await.unwrap();
        assert_eq!(payload, serde_json::json!({ "skipped": true }));
    }
}
