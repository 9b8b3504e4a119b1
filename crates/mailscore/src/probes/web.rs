//! Web presence: a single bounded GET against the bare domain, HTTPS
//! first. Cached per domain.

use crate::caches::Scored;
use crate::engine::Verifier;
use crate::report::WebPresenceDetail;

pub(crate) async fn web_presence(verifier: &Verifier, domain: &str) -> Scored<WebPresenceDetail> {
    if let Some(cached) = verifier.caches.web_presence.get(domain) {
        return cached;
    }

    let mut points = 0;
    let mut detail = WebPresenceDetail::default();

    for template in &verifier.config.web_url_templates {
        let url = template.replace("{domain}", domain);
        match verifier.http.get(&url).send().await {
            Ok(response) => {
                detail.has_website = true;
                detail.http_status = Some(response.status().as_u16());
                points += 5;
                if response.status().as_u16() == 200 {
                    points += 5;
                }
                break;
            }
            Err(err) => {
                tracing::debug!("web presence fetch {url} failed: {err}");
            }
        }
    }

    if !detail.has_website {
        points = -10;
    }

    let scored = Scored { points, detail };
    verifier.caches.web_presence.insert(
        domain.to_string(),
        scored.clone(),
        verifier.caches.ttl(),
    );
    scored
}
