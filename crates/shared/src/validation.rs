//! Common validation utilities for endpoint configuration.

use std::net::IpAddr;

use validator::ValidationError;

/// Maximum accepted length of a webhook target URL.
pub const MAX_URL_LENGTH: usize = 2048;

/// Maximum accepted length of a single event type name.
const MAX_EVENT_TYPE_LENGTH: usize = 100;

/// Validates that a webhook URL is well formed and uses an http(s) scheme.
pub fn validate_webhook_url(url: &str) -> Result<(), ValidationError> {
    if url.len() > MAX_URL_LENGTH {
        let mut err = ValidationError::new("url_length");
        err.message = Some("URL must be at most 2048 characters".into());
        return Err(err);
    }

    let lower = url.to_ascii_lowercase();
    let Some(rest) = strip_scheme(&lower) else {
        let mut err = ValidationError::new("url_scheme");
        err.message = Some("URL must use the http or https scheme".into());
        return Err(err);
    };

    let host = authority(rest);
    if host.is_empty() || host.starts_with(':') || host.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("url_host");
        err.message = Some("URL must include a valid host".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects URLs whose host is loopback, private, link-local or otherwise
/// internal. Only literal addresses and well-known internal names are
/// checked; hostnames are not resolved.
pub fn validate_public_url(url: &str) -> Result<(), ValidationError> {
    let Some(host) = url_host(url) else {
        let mut err = ValidationError::new("url_host");
        err.message = Some("URL must include a valid host".into());
        return Err(err);
    };
    if is_private_host(&host) {
        let mut err = ValidationError::new("url_private");
        err.message = Some(format!("Private or internal address not allowed: {host}").into());
        return Err(err);
    }
    Ok(())
}

/// Host of an http(s) URL, lowercased, without userinfo, port or IPv6
/// brackets.
pub fn url_host(url: &str) -> Option<String> {
    let lower = url.to_ascii_lowercase();
    let authority = authority(strip_scheme(&lower)?);
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or_default(),
        None => authority.split(':').next().unwrap_or_default(),
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// True for loopback, private, link-local, CGNAT and unspecified addresses
/// and for internal hostnames such as `localhost` or `*.internal`.
pub fn is_private_host(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }
    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".internal")
        || host.ends_with(".local")
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // fc00::/7
                || (first & 0xffc0) == 0xfe80 // fe80::/10
        }
    }
}

fn strip_scheme(lower: &str) -> Option<&str> {
    lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
}

/// `host[:port]` part of a scheme-less URL.
fn authority(rest: &str) -> &str {
    rest.split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default()
}

/// Validates a list of subscribed event types.
///
/// Names may be exact (`form.submitted`), the catch-all `*`, or a prefix
/// wildcard ending in `*` (`form.*`).
pub fn validate_event_types(event_types: &[String]) -> Result<(), ValidationError> {
    if event_types.is_empty() {
        let mut err = ValidationError::new("event_types_empty");
        err.message = Some("At least one event type is required".into());
        return Err(err);
    }

    for event_type in event_types {
        let valid_chars = event_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*'));
        let star_ok = match event_type.find('*') {
            None => true,
            Some(pos) => pos == event_type.len() - 1,
        };
        if event_type.is_empty()
            || event_type.len() > MAX_EVENT_TYPE_LENGTH
            || !valid_chars
            || !star_ok
        {
            let mut err = ValidationError::new("event_type_format");
            err.message = Some(format!("Invalid event type: {}", event_type).into());
            return Err(err);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_webhook_url_accepts_http_and_https() {
        assert!(validate_webhook_url("https://hooks.example.com/in").is_ok());
        assert!(validate_webhook_url("http://localhost:8080/hook").is_ok());
        assert!(validate_webhook_url("HTTPS://EXAMPLE.COM").is_ok());
    }

    #[test]
    fn test_validate_webhook_url_rejects_other_schemes() {
        let err = validate_webhook_url("ftp://example.com/file").unwrap_err();
        assert_eq!(err.code, "url_scheme");
        assert!(validate_webhook_url("javascript:alert(1)").is_err());
        assert!(validate_webhook_url("example.com/hook").is_err());
    }

    #[test]
    fn test_validate_webhook_url_rejects_missing_host() {
        assert_eq!(validate_webhook_url("https://").unwrap_err().code, "url_host");
        assert_eq!(validate_webhook_url("https:///path").unwrap_err().code, "url_host");
        assert!(validate_webhook_url("https://bad host/").is_err());
    }

    #[test]
    fn test_validate_webhook_url_length() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(validate_webhook_url(&url).unwrap_err().code, "url_length");
    }

    #[test]
    fn test_url_host_strips_port_and_userinfo() {
        assert_eq!(
            url_host("https://user:pw@Hooks.Example.com:8443/in").as_deref(),
            Some("hooks.example.com")
        );
        assert_eq!(url_host("http://[::1]:8080/hook").as_deref(), Some("::1"));
        assert_eq!(url_host("ftp://example.com"), None);
        assert_eq!(url_host("https://"), None);
    }

    #[test]
    fn test_private_hosts() {
        for host in [
            "localhost",
            "api.localhost",
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.10",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:10.0.0.1",
            "metadata.google.internal",
            "printer.local",
        ] {
            assert!(is_private_host(host), "{host} should be private");
        }
        for host in ["example.com", "8.8.8.8", "172.32.0.1", "2001:4860:4860::8888"] {
            assert!(!is_private_host(host), "{host} should be public");
        }
    }

    #[test]
    fn test_validate_public_url() {
        assert!(validate_public_url("https://hooks.example.com/in").is_ok());
        assert_eq!(
            validate_public_url("http://127.0.0.1:9000/hook").unwrap_err().code,
            "url_private"
        );
        assert_eq!(
            validate_public_url("http://[fc00::5]/hook").unwrap_err().code,
            "url_private"
        );
        assert!(validate_public_url("https://LOCALHOST/hook").is_err());
    }

    #[test]
    fn test_validate_event_types() {
        assert!(validate_event_types(&["form.submitted".to_string()]).is_ok());
        assert!(validate_event_types(&["*".to_string()]).is_ok());
        assert!(validate_event_types(&["form.*".to_string()]).is_ok());
        assert!(validate_event_types(&[]).is_err());
        assert!(validate_event_types(&["form.*.x".to_string()]).is_err());
        assert!(validate_event_types(&["has space".to_string()]).is_err());
        assert!(validate_event_types(&[String::new()]).is_err());
    }
}
