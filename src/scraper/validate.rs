//! URL validation applied before any scrape or task is created.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

use crate::limits::MAX_URL_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL is required")]
    Missing,

    #[error("URL too long (max {max} characters)")]
    TooLong { max: usize },

    #[error("invalid URL: {0}")]
    Unparsable(String),

    #[error("unsupported scheme '{0}' (only http and https are allowed)")]
    Scheme(String),

    #[error("URL has no host")]
    NoHost,

    #[error("access to host '{0}' is not allowed")]
    BlockedHost(String),
}

/// Checks scrape targets: http(s) only, bounded length, and no private or
/// loopback destinations unless explicitly allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlValidator {
    allow_private_hosts: bool,
}

impl UrlValidator {
    pub fn new(allow_private_hosts: bool) -> Self {
        Self {
            allow_private_hosts,
        }
    }

    pub fn allow_private_hosts(&self) -> bool {
        self.allow_private_hosts
    }

    pub fn validate(&self, raw: &str) -> Result<Url, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::Missing);
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(ValidationError::TooLong {
                max: MAX_URL_LENGTH,
            });
        }

        let url = Url::parse(raw).map_err(|e| ValidationError::Unparsable(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::Scheme(url.scheme().to_string()));
        }

        let host = url.host().ok_or(ValidationError::NoHost)?;
        if !self.allow_private_hosts && is_blocked(&host) {
            return Err(ValidationError::BlockedHost(host.to_string()));
        }

        Ok(url)
    }
}

fn is_blocked(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}

/// Whether an already-resolved address is a private destination.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(&v4),
        IpAddr::V6(v6) => is_private_v6(&v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_http_urls() {
        let validator = UrlValidator::default();
        let url = validator.validate("  https://example.com/path?q=1 ").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
        assert!(validator.validate("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn test_rejects_bad_input() {
        let validator = UrlValidator::default();
        assert_eq!(validator.validate(""), Err(ValidationError::Missing));
        assert!(matches!(
            validator.validate("not a url"),
            Err(ValidationError::Unparsable(_))
        ));
        assert_eq!(
            validator.validate("ftp://example.com/file"),
            Err(ValidationError::Scheme("ftp".into()))
        );

        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(
            validator.validate(&long),
            Err(ValidationError::TooLong { max: MAX_URL_LENGTH })
        );
    }

    #[test]
    fn test_blocks_private_destinations() {
        let validator = UrlValidator::default();
        for url in [
            "http://localhost:8080/",
            "http://api.localhost/",
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://192.168.0.10/",
            "http://172.16.5.4/",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(
                matches!(validator.validate(url), Err(ValidationError::BlockedHost(_))),
                "{} should be blocked",
                url
            );
        }
    }

    #[test]
    fn test_private_hosts_allowed_when_configured() {
        let validator = UrlValidator::new(true);
        assert!(validator.validate("http://127.0.0.1:3000/").is_ok());
        assert!(validator.validate("http://localhost/").is_ok());
    }

    #[test]
    fn test_is_private_ip() {
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
    }
}
