//! Addresses the control API can be reached at, for the startup banner.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use super::Protocol;

/// Non-routable target. Connecting a UDP socket sends nothing but selects
/// the outbound interface.
const ROUTE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 255, 255, 255), 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUrl {
    pub label: String,
    pub url: String,
}

fn primary_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_TARGET).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

fn host_for(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

fn is_local(host: &str) -> bool {
    host == "localhost"
        || host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

/// Hosts worth advertising for a listener bound to `bound`. A wildcard bind
/// is reachable on loopback and on the primary LAN interface.
pub fn advertised_hosts(bound: IpAddr) -> Vec<String> {
    if !bound.is_unspecified() {
        return vec![host_for(bound)];
    }
    let mut hosts = vec!["127.0.0.1".to_string(), "localhost".to_string()];
    hosts.extend(primary_ip().map(host_for));
    hosts
}

/// One URL per host and scheme: plain HTTP always, HTTPS too in dual mode.
pub fn access_urls(hosts: &[String], port: u16, protocol: Protocol) -> Vec<AccessUrl> {
    let schemes: &[(&str, &str)] = match protocol {
        Protocol::Dual => &[("http", ""), ("https", " (HTTPS)")],
        Protocol::Http => &[("http", "")],
    };

    let mut urls = Vec::new();
    for (scheme, suffix) in schemes {
        let mut network = 0;
        for host in hosts {
            let label = if is_local(host) {
                format!("Local{suffix}")
            } else {
                network += 1;
                format!("Network {network}{suffix}")
            };
            urls.push(AccessUrl {
                label,
                url: format!("{scheme}://{host}:{port}/"),
            });
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dual_mode_lists_http_then_https() {
        let urls = access_urls(&hosts(&["127.0.0.1", "192.168.1.20"]), 9188, Protocol::Dual);
        let rendered: Vec<(&str, &str)> = urls
            .iter()
            .map(|u| (u.label.as_str(), u.url.as_str()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("Local", "http://127.0.0.1:9188/"),
                ("Network 1", "http://192.168.1.20:9188/"),
                ("Local (HTTPS)", "https://127.0.0.1:9188/"),
                ("Network 1 (HTTPS)", "https://192.168.1.20:9188/"),
            ]
        );
    }

    #[test]
    fn plaintext_mode_numbers_networks() {
        let urls = access_urls(
            &hosts(&["localhost", "10.0.0.5", "[fe80::1]"]),
            80,
            Protocol::Http,
        );
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0].label, "Local");
        assert_eq!(urls[2].label, "Network 2");
        assert_eq!(urls[2].url, "http://[fe80::1]:80/");
    }

    #[test]
    fn specific_bind_is_the_only_host() {
        assert_eq!(
            advertised_hosts(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7))),
            vec!["192.168.0.7".to_string()]
        );
        assert_eq!(
            advertised_hosts(IpAddr::V6(Ipv6Addr::LOCALHOST)),
            vec!["[::1]".to_string()]
        );
    }

    #[test]
    fn wildcard_bind_includes_loopback() {
        let hosts = advertised_hosts(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(&hosts[..2], &["127.0.0.1".to_string(), "localhost".to_string()]);
        assert!(hosts.iter().skip(2).all(|h| !is_local(h)));
    }
}
