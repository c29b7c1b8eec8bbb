// src/core/probes/ipinfo.rs

//! Address classification and geolocation for `active_recon`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, warn};

use crate::core::errors::ScanError;

const GEOLOCATION_URL: &str = "https://ipapi.co";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
pub enum IpVersion {
    #[serde(rename = "IPv4")]
    #[strum(serialize = "IPv4")]
    V4,
    #[serde(rename = "IPv6")]
    #[strum(serialize = "IPv6")]
    V6,
}

/// What is known about one resolved address.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IpInfo {
    pub ip: IpAddr,
    #[serde(rename = "type")]
    pub version: IpVersion,
    pub is_global: bool,
    pub is_private: bool,
    pub is_loopback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<Geolocation>,
}

/// The subset of an ipapi.co answer worth keeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Geolocation {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub asn: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// ipapi.co reports lookup failures inside a 200 answer.
#[derive(Debug, Deserialize)]
struct GeolocationAnswer {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(flatten)]
    location: Geolocation,
}

impl IpInfo {
    /// Classifies `ip` without any network access.
    pub fn classify(ip: IpAddr) -> Self {
        let (version, is_private) = match ip {
            IpAddr::V4(v4) => (IpVersion::V4, v4.is_private()),
            IpAddr::V6(v6) => (IpVersion::V6, is_unique_local(&v6)),
        };
        Self {
            ip,
            version,
            is_global: is_global(ip),
            is_private,
            is_loopback: ip.is_loopback(),
            geolocation: None,
        }
    }
}

fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_global_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (b & 0xc0) == 64;
    let benchmarking = a == 198 && (b & 0xfe) == 18;
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || ip.is_multicast()
        || shared
        || benchmarking
        || a == 0
        || a >= 240)
}

fn is_global_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_global_v4(&v4);
    }
    let first = ip.segments()[0];
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || is_unique_local(ip)
        || link_local
        || documentation)
}

pub fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(&v4),
        IpAddr::V6(v6) => is_global_v6(&v6),
    }
}

pub fn parse_geolocation(raw: &str) -> Result<Geolocation, ScanError> {
    let answer: GeolocationAnswer = serde_json::from_str(raw)?;
    if answer.error {
        let reason = answer.reason.unwrap_or_else(|| "unknown reason".to_string());
        return Err(ScanError::probe(format!("geolocation refused: {}", reason)));
    }
    Ok(answer.location)
}

async fn geolocate(client: &reqwest::Client, ip: IpAddr) -> Result<Geolocation, ScanError> {
    let url = format!("{}/{}/json/", GEOLOCATION_URL, ip);
    let body = client.get(&url).send().await?.error_for_status()?.text().await?;
    parse_geolocation(&body)
}

/// Classifies every address and geolocates the public ones. Fails only when every
/// geolocation attempt failed.
pub async fn describe(client: &reqwest::Client, ips: &[IpAddr]) -> Result<Vec<IpInfo>, ScanError> {
    let mut infos: Vec<IpInfo> = ips.iter().copied().map(IpInfo::classify).collect();
    let mut attempted = 0;
    let mut last_error = None;

    for info in infos.iter_mut().filter(|i| i.is_global) {
        attempted += 1;
        match geolocate(client, info.ip).await {
            Ok(location) => info.geolocation = Some(location),
            Err(e) => {
                warn!(ip = %info.ip, error = %e, "Geolocation lookup failed.");
                last_error = Some(e);
            }
        }
    }

    let located = infos.iter().filter(|i| i.geolocation.is_some()).count();
    debug!(addresses = infos.len(), attempted, located, "Address details collected.");
    match last_error {
        Some(e) if located == 0 && attempted > 0 => Err(e),
        _ => Ok(infos),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn public_and_private_addresses_are_told_apart() {
        let public = IpInfo::classify(ip("93.184.216.34"));
        assert_eq!(public.version, IpVersion::V4);
        assert!(public.is_global && !public.is_private);

        let private = IpInfo::classify(ip("192.168.1.10"));
        assert!(private.is_private && !private.is_global);

        let loopback = IpInfo::classify(ip("::1"));
        assert_eq!(loopback.version.to_string(), "IPv6");
        assert!(loopback.is_loopback && !loopback.is_global);

        assert!(!is_global(ip("100.64.0.1")));
        assert!(!is_global(ip("2001:db8::1")));
        assert!(IpInfo::classify(ip("fd00::1")).is_private);
        assert!(is_global(ip("2606:2800:220:1:248:1893:25c8:1946")));
        assert!(!is_global(ip("::ffff:10.0.0.1")));
    }

    #[test]
    fn geolocation_answer_is_parsed() {
        let raw = r#"{"ip":"93.184.216.34","city":"Norwell","region":"Massachusetts",
            "country_name":"United States","org":"EDGECAST","asn":"AS15133",
            "latitude":42.1508,"longitude":-70.8228,"postal":"02061"}"#;
        let location = parse_geolocation(raw).unwrap();
        assert_eq!(location.city.as_deref(), Some("Norwell"));
        assert_eq!(location.asn.as_deref(), Some("AS15133"));
        assert_eq!(location.latitude, Some(42.1508));
    }

    #[test]
    fn geolocation_refusal_is_an_error() {
        let raw = r#"{"ip":"93.184.216.34","error":true,"reason":"RateLimited"}"#;
        let err = parse_geolocation(raw).unwrap_err();
        assert!(err.to_string().contains("RateLimited"));
    }

    #[test]
    fn serialized_info_uses_report_field_names() {
        let value = serde_json::to_value(IpInfo::classify(ip("10.0.0.1"))).unwrap();
        assert_eq!(value["type"], "IPv4");
        assert_eq!(value["is_private"], true);
        assert!(value.get("geolocation").is_none());
    }

    #[tokio::test]
    async fn private_addresses_need_no_lookup() {
        let client = reqwest::Client::new();
        let infos = describe(&client, &[ip("10.0.0.1"), ip("127.0.0.1")]).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.geolocation.is_none()));
    }
}
