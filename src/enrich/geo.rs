//! IP truncation and GeoIP lookup (SPEC_FULL.md §4.D).
//!
//! Grounded on the teacher's GeoIP pattern (lazily opened `maxminddb::Reader`,
//! `None` on any failure rather than a hard error) adapted from Sparklytics's
//! `lookup_geo`.

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub anonymized_ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
}

pub struct GeoEnricher {
    reader: Option<Reader<Vec<u8>>>,
}

impl GeoEnricher {
    /// Opens the MaxMind database at `path`. A missing or unreadable database
    /// is non-fatal: geo fields stay empty, per `SPEC_FULL.md` §4.J.
    pub fn open(path: &str) -> Self {
        let reader = std::fs::read(path)
            .ok()
            .and_then(|bytes| Reader::from_source(bytes).ok());
        Self { reader }
    }

    pub fn without_database() -> Self {
        Self { reader: None }
    }

    pub fn geo(&self, ip: &str) -> GeoInfo {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return GeoInfo::default();
        };
        let anonymized_ip = truncate_ip(addr);

        let Some(reader) = &self.reader else {
            return GeoInfo {
                anonymized_ip,
                ..Default::default()
            };
        };

        let record = reader
            .lookup::<geoip2::City>(addr)
            .ok()
            .flatten();

        let Some(record) = record else {
            return GeoInfo {
                anonymized_ip,
                ..Default::default()
            };
        };

        let country = record.country.iso_code.unwrap_or_default().to_string();
        let region = record
            .subdivisions
            .first()
            .and_then(|sub| sub.names.english)
            .unwrap_or_default()
            .to_string();
        let city = record.city.names.english.unwrap_or_default().to_string();

        GeoInfo {
            anonymized_ip,
            country,
            region,
            city,
        }
    }
}

/// IPv4 truncated to /24, IPv6 truncated to /48. Truncation happens before any
/// lookup or storage; the raw address is never retained.
fn truncate_ip(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => {
            let net: ipnet::Ipv4Net = ipnet::Ipv4Net::new(v4, 24)
                .expect("24 is a valid IPv4 prefix length");
            net.network().to_string()
        }
        IpAddr::V6(v6) => {
            let net: ipnet::Ipv6Net = ipnet::Ipv6Net::new(v6, 48)
                .expect("48 is a valid IPv6 prefix length");
            net.network().to_string()
        }
    }
}
