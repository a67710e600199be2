//! Peer identity and the global lock-acquisition order.
//!
//! Every process in a session is named by the `(host, port)` its RPC server
//! listens on. Identities are totally ordered, host first (lexicographically)
//! and port second (numerically), and that order is the only thing that keeps
//! peers from deadlocking on each other's locks: any sequence that needs the
//! locks of several peers takes them in ascending [`PeerId`] order, via
//! [`acquisition_order`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identity of one peer process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    host: String,
    port: u16,
}

impl PeerId {
    /// Create a new identity.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address the peer listens on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the peer listens on.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses `host:port`. The split happens at the last colon.
impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidConfig(format!("expected host:port, got {s:?}")))?;
        if host.is_empty() {
            return Err(Error::InvalidConfig(format!("missing host in {s:?}")));
        }
        let port = port
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid port in {s:?}")))?;
        Ok(Self::new(host, port))
    }
}

/// Entries of `handles` in the order their locks must be taken.
///
/// The map is unordered on purpose: the ascending sort here is the only
/// ordering that lock fan-outs may rely on.
pub fn acquisition_order<H: Clone>(handles: &HashMap<PeerId, H>) -> Vec<(PeerId, H)> {
    let mut ordered: Vec<(PeerId, H)> = handles
        .iter()
        .map(|(peer, handle)| (peer.clone(), handle.clone()))
        .collect();
    ordered.sort_by(|(a, _), (b, _)| a.cmp(b));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn orders_by_host_then_port() {
        let a9000 = PeerId::new("a", 9000);
        let a9001 = PeerId::new("a", 9001);
        let b1 = PeerId::new("b", 1);

        assert!(a9000 < a9001);
        assert!(a9001 < b1);
        assert!(a9000 < b1);
        assert_eq!(a9000.cmp(&PeerId::new("a", 9000)), Ordering::Equal);
    }

    #[test]
    fn port_compares_numerically() {
        // "10000" < "9000" as strings, but not as ports.
        assert!(PeerId::new("h", 9000) < PeerId::new("h", 10000));
    }

    #[test]
    fn parses_host_and_port() {
        let peer: PeerId = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(peer, PeerId::new("127.0.0.1", 9000));
        assert_eq!(peer.to_string(), "127.0.0.1:9000");

        assert!("nohost".parse::<PeerId>().is_err());
        assert!(":9000".parse::<PeerId>().is_err());
        assert!("host:port".parse::<PeerId>().is_err());
        assert!("host:70000".parse::<PeerId>().is_err());
    }

    #[test]
    fn acquisition_order_is_ascending() {
        let mut handles = HashMap::new();
        handles.insert(PeerId::new("c", 1), 'c');
        handles.insert(PeerId::new("a", 2), 'x');
        handles.insert(PeerId::new("a", 1), 'a');
        handles.insert(PeerId::new("b", 5), 'b');

        let order: Vec<_> = acquisition_order(&handles).into_iter().map(|(_, h)| h).collect();
        assert_eq!(order, vec!['a', 'x', 'b', 'c']);
    }

    fn peer_strategy() -> impl Strategy<Value = PeerId> {
        ("[a-d]{1,3}", 1u16..6).prop_map(|(host, port)| PeerId::new(host, port))
    }

    proptest! {
        #[test]
        fn two_peers_agree_on_acquisition_order(peers in proptest::collection::vec(peer_strategy(), 0..12)) {
            // Two maps built from the same peers in different insertion orders.
            let forward: HashMap<PeerId, ()> = peers.iter().cloned().map(|p| (p, ())).collect();
            let backward: HashMap<PeerId, ()> = peers.iter().rev().cloned().map(|p| (p, ())).collect();

            let a: Vec<PeerId> = acquisition_order(&forward).into_iter().map(|(p, _)| p).collect();
            let b: Vec<PeerId> = acquisition_order(&backward).into_iter().map(|(p, _)| p).collect();
            prop_assert_eq!(&a, &b);
            prop_assert!(a.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn ordering_is_antisymmetric(a in peer_strategy(), b in peer_strategy()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        }
    }
}
