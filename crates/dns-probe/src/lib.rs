use hickory_resolver::proto::ProtoError;
pub use hickory_resolver::proto::rr::RecordType;
pub use hickory_resolver::Name;
use std::net::IpAddr;

mod resolver;
pub use resolver::{
    ptr_host, reverse_ip, Answer, DnsError, HickoryResolver, IpDisplay, MxRecord, Resolver,
    TestResolver,
};

pub fn fully_qualify(domain_name: &str) -> Result<Name, ProtoError> {
    let mut name = Name::from_str_relaxed(domain_name)?.to_lowercase();

    // Treat it as fully qualified
    name.set_fqdn(true);

    Ok(name)
}

/// Flatten a set of MX records into the ordered list of hosts to try:
/// ascending preference, hosts sorted within each preference level,
/// lowercased, trailing dot stripped.
pub fn order_mx_hosts(mut records: Vec<MxRecord>) -> Vec<String> {
    records.sort_unstable_by(|a, b| {
        a.preference
            .cmp(&b.preference)
            .then_with(|| a.host.cmp(&b.host))
    });
    records
        .into_iter()
        .map(|mx| {
            mx.host
                .to_ascii_lowercase()
                .trim_end_matches('.')
                .to_string()
        })
        .collect()
}

/// The DNSBL query name for an address-based list such as
/// `zen.spamhaus.org`: the reversed IP joined with the zone.
pub fn dnsbl_query_name(ip: IpAddr, zone: &str) -> String {
    format!("{}.{zone}", reverse_ip(ip))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    fn mx(pref: u16, host: &str) -> MxRecord {
        MxRecord {
            preference: pref,
            host: host.to_string(),
        }
    }

    #[test]
    fn mx_ordering() {
        let hosts = order_mx_hosts(vec![
            mx(20, "Alt2.example.NET."),
            mx(5, "mx1.example.net."),
            mx(10, "alt1.example.net."),
        ]);
        assert_eq!(hosts, vec!["mx1.example.net", "alt1.example.net", "alt2.example.net"]);
    }

    #[test]
    fn mx_ordering_ties_sort_by_host() {
        let hosts = order_mx_hosts(vec![mx(10, "b.example.com."), mx(10, "a.example.com.")]);
        assert_eq!(hosts, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn dnsbl_name() {
        assert_eq!(
            dnsbl_query_name(Ipv4Addr::new(192, 0, 2, 1).into(), "zen.spamhaus.org"),
            "1.2.0.192.zen.spamhaus.org"
        );
    }
}
