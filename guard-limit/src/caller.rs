/// Identity used when no forwarding address is available.
pub const UNKNOWN_IDENTITY: &str = "<UNKNOWN>";

/// Derive a caller identity from a forwarding-address token.
///
/// The identity is the first colon-delimited segment of the token. This splits an
/// `address:port` pair, it does not walk a comma separated proxy chain.
pub fn identity_from_forwarded(forwarded: Option<&str>) -> &str {
    match forwarded.and_then(|raw| raw.split(':').next()) {
        Some(identity) if !identity.is_empty() => identity,
        _ => UNKNOWN_IDENTITY,
    }
}

/// The final path segment of `url`, ignoring any query string.
pub fn endpoint_from_url(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_takes_the_first_colon_segment() {
        assert_eq!(identity_from_forwarded(Some("10.1.2.3:51234")), "10.1.2.3");
        assert_eq!(identity_from_forwarded(Some("10.1.2.3")), "10.1.2.3");
        // Proxy chains are not split on commas
        assert_eq!(
            identity_from_forwarded(Some("10.1.2.3, 172.16.0.1")),
            "10.1.2.3, 172.16.0.1"
        );
    }

    #[test]
    fn it_falls_back_to_unknown() {
        assert_eq!(identity_from_forwarded(None), UNKNOWN_IDENTITY);
        assert_eq!(identity_from_forwarded(Some("")), UNKNOWN_IDENTITY);
        assert_eq!(identity_from_forwarded(Some(":8080")), UNKNOWN_IDENTITY);
    }

    #[test]
    fn it_extracts_the_endpoint() {
        assert_eq!(endpoint_from_url("https://host/api/v2/orders"), "orders");
        assert_eq!(endpoint_from_url("/api/v2/orders?id=5&x=/y"), "orders");
        assert_eq!(endpoint_from_url("/api/v2/"), "");
        assert_eq!(endpoint_from_url("orders"), "orders");
        assert_eq!(endpoint_from_url(""), "");
    }
}
