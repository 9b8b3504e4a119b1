//! End-to-end verification scenarios against scripted loopback
//! infrastructure: a behavioural SMTP peer, a minimal HTTP origin for
//! web-presence/RDAP, and a zone-backed resolver.

use async_trait::async_trait;
use dns_probe::{Answer, DnsError, Name, RecordType, Resolver, TestResolver};
use mailscore::{Status, Verifier, VerifierConfig, VerifyOptions};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
enum RcptPolicy {
    AcceptAll,
    /// Accept the listed local parts, 550 everything else.
    AcceptListed(Vec<&'static str>),
    RejectAll,
    /// 451 on the first attempt per address, 250 afterwards.
    GreylistThenAccept,
}

#[derive(Clone)]
struct SmtpFixture {
    banner: &'static str,
    extensions: &'static [&'static str],
    reject_invalid_sender: bool,
    rcpt: RcptPolicy,
}

impl SmtpFixture {
    fn accepting(locals: Vec<&'static str>) -> Self {
        Self {
            banner: "220 mx.test.example ESMTP Postfix",
            extensions: &["PIPELINING", "8BITMIME", "SIZE 10240000"],
            reject_invalid_sender: true,
            rcpt: RcptPolicy::AcceptListed(locals),
        }
    }
}

fn rcpt_reply(policy: &RcptPolicy, address: &str, attempt: usize) -> String {
    match policy {
        RcptPolicy::AcceptAll => "250 2.1.5 Ok\r\n".to_string(),
        RcptPolicy::RejectAll => "550 5.1.1 User unknown\r\n".to_string(),
        RcptPolicy::AcceptListed(locals) => {
            let local = address.split('@').next().unwrap_or("");
            if locals.contains(&local) {
                "250 2.1.5 Ok\r\n".to_string()
            } else {
                "550 5.1.1 User unknown\r\n".to_string()
            }
        }
        RcptPolicy::GreylistThenAccept => {
            if attempt <= 1 {
                "451 4.7.1 Greylisted, please retry later\r\n".to_string()
            } else {
                "250 2.1.5 Ok\r\n".to_string()
            }
        }
    }
}

async fn smtp_session(
    stream: TcpStream,
    fixture: SmtpFixture,
    seen: Arc<Mutex<HashMap<String, usize>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half
        .write_all(format!("{}\r\n", fixture.banner).as_bytes())
        .await?;
    write_half.flush().await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end().to_string();
        let upper = command.to_ascii_uppercase();

        let reply: String = if upper.starts_with("EHLO") {
            let mut lines = vec!["mx.test.example".to_string()];
            lines.extend(fixture.extensions.iter().map(|ext| ext.to_string()));
            let mut out = String::new();
            for (i, content) in lines.iter().enumerate() {
                let sep = if i + 1 == lines.len() { ' ' } else { '-' };
                out.push_str(&format!("250{sep}{content}\r\n"));
            }
            out
        } else if upper.starts_with("HELO") {
            "250 mx.test.example\r\n".to_string()
        } else if upper.starts_with("MAIL FROM") {
            if fixture.reject_invalid_sender && command.contains(".invalid") {
                "550 5.7.1 sender address rejected\r\n".to_string()
            } else {
                "250 2.1.0 Ok\r\n".to_string()
            }
        } else if upper.starts_with("RCPT TO") {
            let address = command
                .split_once('<')
                .and_then(|(_, rest)| rest.split_once('>'))
                .map(|(addr, _)| addr.to_string())
                .unwrap_or_default();
            let attempt = {
                let mut seen = seen.lock().unwrap();
                let n = seen.entry(address.clone()).or_insert(0);
                *n += 1;
                *n
            };
            rcpt_reply(&fixture.rcpt, &address, attempt)
        } else if upper.starts_with("NOOP") || upper.starts_with("RSET") {
            "250 2.0.0 Ok\r\n".to_string()
        } else if upper.starts_with("QUIT") {
            write_half.write_all(b"221 2.0.0 Bye\r\n").await?;
            write_half.flush().await?;
            return Ok(());
        } else {
            "502 5.5.2 Command not recognized\r\n".to_string()
        };

        write_half.write_all(reply.as_bytes()).await?;
        write_half.flush().await?;
    }
}

async fn spawn_smtp(fixture: SmtpFixture) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let fixture = fixture.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let _ = smtp_session(stream, fixture, seen).await;
            });
        }
    });
    port
}

/// Minimal HTTP origin: every request gets a 200 with the given body,
/// and bumps the hit counter.
async fn spawn_http(body: &'static str) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (port, hits)
}

/// A port with nothing listening: connects are refused immediately.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

struct CountingResolver {
    inner: TestResolver,
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl Resolver for CountingResolver {
    async fn resolve_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve_ip(host).await
    }

    async fn resolve_ptr(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve_ptr(ip).await
    }

    async fn resolve(&self, name: Name, rrtype: RecordType) -> Result<Answer, DnsError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(name, rrtype).await
    }
}

const RDAP_OLD_DOMAIN: &str =
    r#"{"events":[{"eventAction":"registration","eventDate":"2015-06-01T00:00:00Z"}]}"#;

async fn test_config(smtp_port: u16) -> VerifierConfig {
    let closed = closed_port().await;
    let mut config = VerifierConfig::default();
    config.smtp_port = smtp_port;
    config.sender_domain = "probe.test.example".to_string();
    config.enable_internet_checks = false;
    config.web_url_templates = vec![format!("http://127.0.0.1:{closed}")];
    config.rdap_base_url = format!("http://127.0.0.1:{closed}");
    config
}

fn options(fast_mode: bool) -> VerifyOptions {
    VerifyOptions {
        fast_mode,
        internet_checks: false,
        ..VerifyOptions::default()
    }
}

fn gmail_zone() -> TestResolver {
    TestResolver::default().with_zone(
        r#"
$ORIGIN gmail.com.
@      60 IN A 192.0.2.27
@      60 IN MX 5 gmail-smtp-in.l.google.com.
@      60 IN TXT "v=spf1 include:_spf.google.com ~all"
_dmarc 60 IN TXT "v=DMARC1; p=none; sp=quarantine"
google._domainkey 60 IN TXT "v=DKIM1; k=rsa; p=MIGfMA0GCSq"
"#,
    )
}

fn healthy_zone() -> TestResolver {
    TestResolver::default()
        .with_zone(
            r#"
$ORIGIN test.example.
@      60 IN A 192.0.2.5
@      60 IN MX 10 127.0.0.1.
@      60 IN MX 20 127.0.0.1.
@      60 IN TXT "v=spf1 ip4:192.0.2.0/24 include:_spf.test.example ~all"
_dmarc 60 IN TXT "v=DMARC1; p=reject"
default._domainkey 60 IN TXT "v=DKIM1; k=rsa; p=MIGfMA0GCSq"
mx     60 IN A 127.0.0.1
"#,
        )
        .with_zone(
            r#"
$ORIGIN 1.0.0.127.in-addr.arpa.
@ 60 IN PTR mx.test.example.
"#,
        )
}

#[tokio::test]
async fn invalid_syntax_performs_no_lookups() {
    let queries = Arc::new(AtomicUsize::new(0));
    let resolver = CountingResolver {
        inner: TestResolver::default(),
        queries: queries.clone(),
    };
    let config = test_config(closed_port().await).await;
    let verifier = Verifier::with_resolver(config, Arc::new(resolver)).unwrap();

    let report = verifier.verify("not-an-address", &options(true)).await;
    assert_eq!(report.status, Status::Invalid);
    assert_eq!(report.score, 0);
    assert_eq!(report.confidence, 0.0);
    k9::assert_equal!(report.reason, "Invalid email syntax");
    assert_eq!(queries.load(Ordering::SeqCst), 0, "no DNS may be performed");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["syntax"]["valid"], false);
    assert!(json["details"].get("dns_health").is_none());
}

#[tokio::test]
async fn nonexistent_domain_scores_syntax_only() {
    let config = test_config(closed_port().await).await;
    let verifier = Verifier::with_resolver(config, Arc::new(TestResolver::default())).unwrap();

    let report = verifier
        .verify("user@example-no-such-tld.invalid", &options(true))
        .await;
    assert_eq!(report.status, Status::Invalid);
    assert_eq!(report.score, 10, "syntax points only");
    k9::assert_equal!(report.reason, "Domain does not exist");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["dns_health"]["domain_exists"], false);
    assert_eq!(json["details"]["dns_health"]["mx_present"], false);
    assert_eq!(json["details"]["dns_health"]["error_kind"], "dns_nxdomain");
    assert!(json["details"].get("smtp_connection").is_none());
}

#[tokio::test]
async fn provider_cap_applies_when_rcpt_unconfirmed() {
    let (web_port, _) = spawn_http("<html>ok</html>").await;
    let mut config = test_config(closed_port().await).await;
    config.web_url_templates = vec![format!("http://127.0.0.1:{web_port}")];
    let verifier = Verifier::with_resolver(config, Arc::new(gmail_zone())).unwrap();

    let report = verifier.verify("user@gmail.com", &options(true)).await;
    // SMTP probing is skipped for the provider, so RCPT cannot confirm
    // the mailbox and the provider ceiling applies.
    assert_eq!(report.score, 55);
    assert_eq!(report.status, Status::Uncertain);
    assert_eq!(report.confidence, 0.55);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["smtp_connection"]["skipped"], true);
    assert_eq!(json["details"]["smtp_rcpt"]["error_kind"], "provider_blocked");
    assert_eq!(json["details"]["provider_rules"]["provider"], "gmail.com");
    assert_eq!(json["details"]["provider_rules"]["score_adjusted"], true);
    assert_eq!(json["details"]["provider_rules"]["adjusted_score"], 55);
}

#[tokio::test]
async fn hard_rcpt_failure_caps_score_at_ten() {
    let smtp_port = spawn_smtp(SmtpFixture {
        banner: "220 mx.test.example ESMTP Postfix",
        extensions: &["PIPELINING", "8BITMIME"],
        reject_invalid_sender: false,
        rcpt: RcptPolicy::RejectAll,
    })
    .await;
    let config = test_config(smtp_port).await;
    let verifier = Verifier::with_resolver(config, Arc::new(healthy_zone())).unwrap();

    let report = verifier.verify("ghost@test.example", &options(true)).await;
    assert!(report.score <= 10, "hard failure must pin the score, got {}", report.score);
    assert_eq!(report.status, Status::Invalid);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["smtp_rcpt"]["rejected"], true);
    assert_eq!(json["details"]["smtp_rcpt"]["hard_failure"], true);
    assert_eq!(json["details"]["smtp_rcpt"]["response_code"], 550);
    assert_eq!(json["details"]["smtp_rcpt"]["error"], "User unknown");
}

#[tokio::test]
async fn accepting_domain_with_clean_infrastructure_is_valid() {
    let smtp_port = spawn_smtp(SmtpFixture::accepting(vec![
        "postmaster",
        "abuse",
        "support",
        "info",
    ]))
    .await;
    let (web_port, _) = spawn_http("<html>ok</html>").await;
    let (rdap_port, _) = spawn_http(RDAP_OLD_DOMAIN).await;

    let mut config = test_config(smtp_port).await;
    config.web_url_templates = vec![format!("http://127.0.0.1:{web_port}")];
    config.rdap_base_url = format!("http://127.0.0.1:{rdap_port}");
    let verifier = Verifier::with_resolver(config, Arc::new(healthy_zone())).unwrap();

    let report = verifier
        .verify("postmaster@test.example", &options(false))
        .await;
    assert!(report.score >= 90, "expected a valid verdict, got {}", report.score);
    assert_eq!(report.status, Status::Valid);
    assert!(!report.risky);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["smtp_rcpt"]["accepted"], true);
    assert_eq!(json["details"]["mx_consistency"]["perfect_cycle"], true);
    assert_eq!(json["details"]["domain_blacklists"]["points"], 10);
    assert_eq!(json["details"]["domain_age"]["points"], 10);
    assert_eq!(json["details"]["role_accounts"]["all_valid"], true);
    assert_eq!(json["details"]["catch_all"]["is_catchall"], false);
}

#[tokio::test]
async fn catch_all_domain_is_risky() {
    let smtp_port = spawn_smtp(SmtpFixture {
        banner: "220 mx.test.example ESMTP Postfix",
        extensions: &["PIPELINING", "8BITMIME", "SIZE 10240000"],
        reject_invalid_sender: true,
        rcpt: RcptPolicy::AcceptAll,
    })
    .await;
    let config = test_config(smtp_port).await;
    let verifier = Verifier::with_resolver(config, Arc::new(healthy_zone())).unwrap();

    let report = verifier
        .verify("whoever@test.example", &options(false))
        .await;
    assert!(report.risky, "catch-all must be flagged risky");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["catch_all"]["is_catchall"], true);
    assert_eq!(json["risky"], true);
    // The +10 catch-all bonus is applied on top of the probe total.
    assert_eq!(
        report.score as i32,
        (report.details.total_points() + 10).clamp(0, 100)
    );
}

#[tokio::test]
async fn dbl_listed_domain_is_penalized() {
    let smtp_port = spawn_smtp(SmtpFixture::accepting(vec!["user"])).await;
    let resolver = TestResolver::default()
        .with_zone(
            r#"
$ORIGIN badco.example.
@  60 IN A 192.0.2.66
@  60 IN MX 10 127.0.0.1.
"#,
        )
        .with_zone(
            r#"
$ORIGIN badco.example.dbl.spamhaus.org.
@ 60 IN A 127.0.0.2
"#,
        );
    let config = test_config(smtp_port).await;
    let verifier = Verifier::with_resolver(config, Arc::new(resolver)).unwrap();

    let report = verifier.verify("user@badco.example", &options(false)).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["domain_blacklists"]["points"], -10);
    assert_eq!(json["details"]["domain_blacklists"]["blacklisted"], true);
    assert!(
        report.score < 90,
        "a DBL-listed domain must not reach a valid verdict, got {}",
        report.score
    );
}

#[tokio::test]
async fn repeat_verification_hits_caches() {
    let queries = Arc::new(AtomicUsize::new(0));
    let resolver = CountingResolver {
        inner: gmail_zone(),
        queries: queries.clone(),
    };
    let (web_port, web_hits) = spawn_http("<html>ok</html>").await;
    let mut config = test_config(closed_port().await).await;
    config.web_url_templates = vec![format!("http://127.0.0.1:{web_port}")];
    let verifier = Verifier::with_resolver(config, Arc::new(resolver)).unwrap();

    let first = verifier.verify("user@gmail.com", &options(true)).await;
    let dns_after_first = queries.load(Ordering::SeqCst);
    let web_after_first = web_hits.load(Ordering::SeqCst);
    assert!(dns_after_first > 0);
    assert_eq!(web_after_first, 1);

    let second = verifier.verify("user@gmail.com", &options(true)).await;
    assert_eq!(
        queries.load(Ordering::SeqCst),
        dns_after_first,
        "second verification must be served from the DNS caches"
    );
    assert_eq!(
        web_hits.load(Ordering::SeqCst),
        web_after_first,
        "second verification must not refetch the web origin"
    );
    assert_eq!(first.score, second.score);
    assert_eq!(first.status, second.status);
}

#[tokio::test]
async fn greylisting_recovers_via_retry() {
    let smtp_port = spawn_smtp(SmtpFixture {
        banner: "220 mx.test.example ESMTP Postfix",
        extensions: &["PIPELINING", "8BITMIME", "SIZE 10240000"],
        reject_invalid_sender: true,
        rcpt: RcptPolicy::GreylistThenAccept,
    })
    .await;
    let resolver = TestResolver::default().with_zone(
        r#"
$ORIGIN grey.example.
@ 60 IN A 192.0.2.9
@ 60 IN MX 10 127.0.0.1.
"#,
    );
    let config = test_config(smtp_port).await;
    let verifier = Verifier::with_resolver(config, Arc::new(resolver)).unwrap();

    let report = verifier.verify("user@grey.example", &options(false)).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["smtp_rcpt"]["soft_failure"], true);
    assert_eq!(json["details"]["smtp_rcpt"]["response_code"], 451);
    assert_eq!(json["details"]["smtp_retry"]["success_after_retry"], true);
    assert_eq!(json["details"]["smtp_retry"]["points"], 20);
    assert_eq!(json["details"]["greylist_depth"]["depth"], 1);
}

#[tokio::test]
async fn domain_overrides_apply_last() {
    let mut config = test_config(closed_port().await).await;
    config.overrides.insert(
        "gmail.com".to_string(),
        mailscore::DomainOverride {
            min_score: Some(80),
            force_status: Some(Status::LikelyValid),
        },
    );
    let verifier = Verifier::with_resolver(config, Arc::new(gmail_zone())).unwrap();

    let report = verifier.verify("user@gmail.com", &options(true)).await;
    // The provider cap would leave this at most 55; the override floor
    // and forced status win.
    assert_eq!(report.score, 80);
    assert_eq!(report.confidence, 0.80);
    assert_eq!(report.status, Status::LikelyValid);
}

#[tokio::test]
async fn enrichment_payload_is_merged() {
    let config = test_config(closed_port().await).await;
    let verifier = Verifier::with_resolver(config, Arc::new(gmail_zone())).unwrap();

    let mut opts = options(true);
    opts.internet_checks = true;
    let report = verifier.verify("user@gmail.com", &opts).await;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"]["internet_check"]["skipped"], true);
}
