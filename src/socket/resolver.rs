//! Host name resolution.

use std::fmt;
use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

/// A resolved, connectable address. Recomputed on every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: SocketAddr,
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Resolve `host:port` and keep the first address the resolver returns.
///
/// Literal IP addresses resolve without a DNS round trip.
pub async fn resolve(
    host: &str,
    port: u16,
    cancel: &CancellationToken,
) -> Result<Endpoint, BridgeError> {
    let lookup = tokio::net::lookup_host((host, port));
    let addrs = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
        res = lookup => res.map_err(|e| BridgeError::UnresolvedHost {
            host: host.to_string(),
            detail: e.to_string(),
        })?,
    };
    first_endpoint(host, addrs)
}

/// Pick the first address, failing when there is none.
pub fn first_endpoint<I>(host: &str, addrs: I) -> Result<Endpoint, BridgeError>
where
    I: IntoIterator<Item = SocketAddr>,
{
    addrs
        .into_iter()
        .next()
        .map(Endpoint::from)
        .ok_or_else(|| BridgeError::UnresolvedHost {
            host: host.to_string(),
            detail: "resolver returned no addresses".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_endpoint_keeps_resolver_order() {
        let a: SocketAddr = "10.0.0.2:80".parse().unwrap();
        let b: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let ep = first_endpoint("svc", vec![a, b]).unwrap();
        assert_eq!(ep.addr, a);
    }

    #[test]
    fn zero_addresses_is_unresolved() {
        let err = first_endpoint("svc", Vec::new()).unwrap_err();
        assert!(matches!(err, BridgeError::UnresolvedHost { ref host, .. } if host == "svc"));
    }

    #[tokio::test]
    async fn literal_ip_resolves() {
        let ep = resolve("127.0.0.1", 4000, &CancellationToken::new()).await.unwrap();
        assert_eq!(ep.to_string(), "127.0.0.1:4000");
    }

    #[tokio::test]
    async fn invalid_name_is_unresolved() {
        let err = resolve("not a hostname", 80, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnresolvedHost { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_lookup() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolve("127.0.0.1", 80, &cancel).await.unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }
}
