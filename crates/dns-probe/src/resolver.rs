use async_trait::async_trait;
use hickory_proto::ProtoErrorKind;
use hickory_resolver::proto::op::response_code::ResponseCode;
use hickory_resolver::proto::rr::rdata::{A, AAAA, MX, PTR, TXT};
use hickory_resolver::proto::rr::{LowerName, RData, RecordData, RecordSet, RecordType, RrKey};
use hickory_resolver::proto::serialize::txt::Parser;
use hickory_resolver::{Name, ResolveError, TokioResolver};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

pub struct IpDisplay {
    pub ip: IpAddr,
    pub reverse: bool,
}

impl fmt::Display for IpDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(v4) => {
                let mut bytes = v4.octets();
                if self.reverse {
                    bytes.reverse();
                }
                let mut first = true;
                for byte in bytes {
                    if !first {
                        f.write_str(".")?;
                    }
                    write!(f, "{byte}")?;
                    first = false;
                }
                Ok(())
            }
            IpAddr::V6(v6) => {
                let mut bytes = v6.octets();
                if self.reverse {
                    bytes.reverse();
                }
                let mut first = true;
                for byte in bytes {
                    if !first {
                        f.write_str(".")?;
                    }
                    let (upper, lower) = (byte >> 4, byte & 0xf);
                    if self.reverse {
                        write!(f, "{lower:x}.{upper:x}")?;
                    } else {
                        write!(f, "{upper:x}.{lower:x}")?;
                    }
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// Render an IP address with its components reversed, the form used to
/// compose DNSBL query names.
pub fn reverse_ip(ip: IpAddr) -> String {
    IpDisplay { ip, reverse: true }.to_string()
}

pub fn ptr_host(ip: IpAddr) -> String {
    let mut out = reverse_ip(ip);
    out.push_str(match ip {
        IpAddr::V4(_) => ".in-addr.arpa",
        IpAddr::V6(_) => ".ip6.arpa",
    });
    out
}

/// An MX record as advertised by a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub host: String,
}

#[derive(Debug)]
pub struct Answer {
    pub records: Vec<RData>,
    pub nxdomain: bool,
    pub response_code: ResponseCode,
    pub expires: Instant,
}

impl Answer {
    pub fn as_txt(&self) -> Vec<String> {
        let mut result = vec![];
        for r in &self.records {
            if let Some(txt) = r.as_txt() {
                let mut joined = String::new();
                for t in txt.iter() {
                    joined.push_str(&String::from_utf8_lossy(t));
                }
                result.push(joined);
            }
        }
        result
    }

    pub fn as_addr(&self) -> Vec<IpAddr> {
        let mut result = vec![];
        for r in &self.records {
            if let Some(a) = r.as_a() {
                result.push(a.0.into());
            } else if let Some(a) = r.as_aaaa() {
                result.push(a.0.into());
            }
        }
        result
    }

    pub fn as_mx(&self) -> Vec<MxRecord> {
        let mut result = vec![];
        for r in &self.records {
            if let Some(mx) = r.as_mx() {
                result.push(MxRecord {
                    preference: mx.preference(),
                    host: mx.exchange().to_lowercase().to_ascii(),
                });
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DnsError {
    #[error("invalid DNS name: {0}")]
    InvalidName(String),
    #[error("DNS: {0}")]
    ResolveFailed(String),
}

impl DnsError {
    pub(crate) fn from_resolve(name: &impl fmt::Display, err: ResolveError) -> Self {
        DnsError::ResolveFailed(format!("failed to query DNS for {name}: {err}"))
    }
}

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;

    async fn resolve_ptr(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;

    async fn resolve_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError> {
        let name = Name::from_utf8(domain)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {domain}: {err}")))?;
        let answer = self.resolve(name, RecordType::MX).await?;
        Ok(answer.as_mx())
    }

    async fn resolve_txt(&self, name: &str) -> Result<Answer, DnsError> {
        let name = Name::from_utf8(name)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {name}: {err}")))?;
        self.resolve(name, RecordType::TXT).await
    }

    async fn resolve(&self, name: Name, rrtype: RecordType) -> Result<Answer, DnsError>;
}

/// A resolver whose records are loaded from zone file text, for tests.
#[derive(Debug, Default)]
pub struct TestResolver {
    records: BTreeMap<Name, BTreeMap<RrKey, RecordSet>>,
}

impl TestResolver {
    pub fn with_zone(mut self, zone: &str) -> Self {
        let (mut name, records) = Parser::new(zone, None, None).parse().unwrap();
        // The parser can create results with varying FQDN-ness, so let's
        // ensure that they're all marked as FQDN, otherwise our get()
        // function can fail to resolve data from the zone.
        name.set_fqdn(true);
        let fqdn_records = records
            .into_iter()
            .map(|(key, value)| {
                if key.name().is_fqdn() {
                    (key, value)
                } else {
                    let mut name: Name = key.name().into();
                    name.set_fqdn(true);
                    (RrKey::new(LowerName::new(&name), key.record_type), value)
                }
            })
            .collect();
        self.records.insert(name, fqdn_records);
        self
    }

    pub fn with_txt(mut self, domain: &str, value: String) -> Self {
        let fqdn = format!("{}.", domain);
        let authority = Name::from_str(&fqdn).unwrap();
        let key = RrKey {
            name: LowerName::from_str(&fqdn).unwrap(),
            record_type: RecordType::TXT,
        };

        let mut records = RecordSet::new(authority.clone(), RecordType::TXT, 0);
        records.add_rdata(RData::TXT(TXT::new(vec![value])));
        self.records
            .entry(authority)
            .or_default()
            .insert(key, records);

        self
    }

    fn get(&self, full: &Name, record_type: RecordType) -> Result<Answer, DnsError> {
        let mut full_fqdn = full.clone();
        full_fqdn.set_fqdn(true);
        let mut authority = full_fqdn.clone();

        let records = loop {
            if let Some(records) = self.records.get(&authority) {
                break records;
            };

            if authority.num_labels() > 1 {
                authority = authority.base_name();
                continue;
            }

            return Ok(Answer {
                records: vec![],
                nxdomain: true,
                response_code: ResponseCode::NXDomain,
                expires: Instant::now() + Duration::from_secs(60),
            });
        };

        let records = records.get(&RrKey {
            name: LowerName::from(&full_fqdn),
            record_type,
        });

        let Some(records) = records else {
            return Ok(Answer {
                records: vec![],
                nxdomain: false,
                response_code: ResponseCode::NoError,
                expires: Instant::now() + Duration::from_secs(60),
            });
        };

        Ok(Answer {
            records: records
                .records_without_rrsigs()
                .map(|r| r.data().clone())
                .collect(),
            nxdomain: false,
            response_code: ResponseCode::NoError,
            expires: Instant::now() + Duration::from_secs(60),
        })
    }
}

#[async_trait]
impl Resolver for TestResolver {
    async fn resolve_ip(&self, full: &str) -> Result<Vec<IpAddr>, DnsError> {
        let name = Name::from_utf8(full)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {full}: {err}")))?;

        let mut values = vec![];
        let answer = self.get(&name, RecordType::A)?;
        for record in answer.records {
            if let Some(a) = A::try_borrow(&record) {
                values.push(IpAddr::V4(a.0));
            }
        }

        let answer = self.get(&name, RecordType::AAAA)?;
        for record in answer.records {
            if let Some(a) = AAAA::try_borrow(&record) {
                values.push(IpAddr::V6(a.0));
            }
        }

        Ok(values)
    }

    async fn resolve_mx(&self, full: &str) -> Result<Vec<MxRecord>, DnsError> {
        let name = Name::from_utf8(full)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {full}: {err}")))?;

        let mut values = vec![];
        let answer = self.get(&name, RecordType::MX)?;
        for record in answer.records {
            if let Some(mx) = MX::try_borrow(&record) {
                values.push(MxRecord {
                    preference: mx.preference(),
                    host: mx.exchange().to_lowercase().to_ascii(),
                });
            }
        }

        Ok(values)
    }

    async fn resolve_ptr(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        let name = ptr_host(ip);
        let name = Name::from_utf8(&name)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {name}: {err}")))?;

        let mut values = vec![];
        let answer = self.get(&name, RecordType::PTR)?;
        for record in answer.records {
            match PTR::try_borrow(&record) {
                Some(ptr) => values.push(ptr.0.to_lowercase().to_ascii()),
                None => {
                    return Err(DnsError::ResolveFailed(format!(
                        "invalid record found for PTR record for {ip}"
                    )));
                }
            };
        }

        Ok(values)
    }

    async fn resolve(&self, name: Name, rrtype: RecordType) -> Result<Answer, DnsError> {
        self.get(&name, rrtype)
    }
}

pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    pub fn new() -> Result<Self, hickory_resolver::ResolveError> {
        Ok(Self {
            inner: TokioResolver::builder_tokio()?.build(),
        })
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn resolve_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let name = Name::from_utf8(host)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {host}: {err}")))?;

        self.inner
            .lookup_ip(name)
            .await
            .map_err(|err| DnsError::from_resolve(&host, err))?
            .into_iter()
            .map(Ok)
            .collect()
    }

    async fn resolve_ptr(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        self.inner
            .reverse_lookup(ip)
            .await
            .map_err(|err| DnsError::from_resolve(&ip, err))?
            .into_iter()
            .map(|ptr| Ok(ptr.0.to_lowercase().to_ascii()))
            .collect()
    }

    async fn resolve(&self, name: Name, rrtype: RecordType) -> Result<Answer, DnsError> {
        match self.inner.lookup(name.clone(), rrtype).await {
            Ok(result) => {
                let expires = result.valid_until();
                let records = result.iter().cloned().collect();
                Ok(Answer {
                    records,
                    nxdomain: false,
                    response_code: ResponseCode::NoError,
                    expires,
                })
            }
            Err(err) => match err.proto().map(|err| err.kind()) {
                Some(ProtoErrorKind::NoRecordsFound {
                    negative_ttl,
                    response_code,
                    ..
                }) => Ok(Answer {
                    records: vec![],
                    nxdomain: *response_code == ResponseCode::NXDomain,
                    response_code: *response_code,
                    expires: Instant::now()
                        + Duration::from_secs(negative_ttl.unwrap_or(60) as u64),
                }),
                _ => {
                    tracing::debug!("lookup of {rrtype} for {name} failed: {err}");
                    Err(DnsError::from_resolve(&name, err))
                }
            },
        }
    }
}

impl From<TokioResolver> for HickoryResolver {
    fn from(inner: TokioResolver) -> Self {
        Self { inner }
    }
}
