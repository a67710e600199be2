//! Peer configuration from the environment and the command line.

use std::time::Duration;

use mosaic_board::{DEFAULT_COLUMNS, DEFAULT_ROWS};

use crate::error::{Error, Result};
use crate::peer::PeerId;
use crate::rpc::{RpcClient, DEFAULT_CONNECT_TIMEOUT};

/// Default host the RPC server binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default RPC port.
pub const DEFAULT_PORT: u16 = 1099;

/// Configuration for one peer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Host this peer listens on and is known by.
    pub host: String,
    /// Port this peer listens on. `0` picks a free port.
    pub port: u16,
    /// Peer to join through. `None` founds a new session.
    pub buddy: Option<PeerId>,
    /// Board rows, used only when founding.
    pub rows: u32,
    /// Board columns, used only when founding.
    pub columns: u32,
    /// Timeout for establishing a connection to another peer.
    pub connect_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            buddy: None,
            rows: DEFAULT_ROWS,
            columns: DEFAULT_COLUMNS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PeerConfig {
    /// Create config from `MOSAIC_*` environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Environment config, overridden by command-line flags.
    ///
    /// Flags: `-h host`, `-p port`, `-H buddy-host`, `-P buddy-port`.
    /// `args` excludes the program name.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::from_env()?;
        config.apply_args(args)?;
        Ok(config)
    }

    /// Client configured with this peer's connect timeout.
    pub fn client(&self) -> RpcClient {
        RpcClient::new(self.connect_timeout)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("MOSAIC_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("MOSAIC_PORT") {
            config.port = parse("MOSAIC_PORT", &port)?;
        }
        if let Some(buddy) = lookup("MOSAIC_BUDDY").filter(|b| !b.trim().is_empty()) {
            config.buddy = Some(buddy.trim().parse()?);
        }
        if let Some(rows) = lookup("MOSAIC_ROWS") {
            config.rows = parse("MOSAIC_ROWS", &rows)?;
        }
        if let Some(columns) = lookup("MOSAIC_COLUMNS") {
            config.columns = parse("MOSAIC_COLUMNS", &columns)?;
        }
        if let Some(ms) = lookup("MOSAIC_CONNECT_TIMEOUT_MS") {
            config.connect_timeout =
                Duration::from_millis(parse("MOSAIC_CONNECT_TIMEOUT_MS", &ms)?);
        }
        Ok(config)
    }

    fn apply_args<I, S>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut buddy_host = self.buddy.as_ref().map(|b| b.host().to_string());
        let mut buddy_port = self.buddy.as_ref().map(|b| b.port());

        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let flag = flag.as_ref();
            let value = args
                .next()
                .ok_or_else(|| Error::InvalidConfig(format!("missing value for {flag}")))?;
            let value = value.as_ref();
            match flag {
                "-h" => self.host = value.to_string(),
                "-p" => self.port = parse(flag, value)?,
                "-H" => buddy_host = Some(value.to_string()),
                "-P" => buddy_port = Some(parse(flag, value)?),
                other => return Err(Error::InvalidConfig(format!("unknown flag {other}"))),
            }
        }

        self.buddy = match (buddy_host, buddy_port) {
            (Some(host), Some(port)) => Some(PeerId::new(host, port)),
            (None, None) => None,
            (Some(host), None) => Some(PeerId::new(host, DEFAULT_PORT)),
            (None, Some(port)) => Some(PeerId::new(DEFAULT_HOST, port)),
        };
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("{name}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = PeerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PeerConfig::default());
        assert_eq!(config.port, 1099);
        assert_eq!((config.rows, config.columns), (3, 5));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = PeerConfig::from_lookup(lookup(&[
            ("MOSAIC_HOST", "10.0.0.2"),
            ("MOSAIC_PORT", "2000"),
            ("MOSAIC_BUDDY", "10.0.0.1:1099"),
            ("MOSAIC_ROWS", "4"),
            ("MOSAIC_COLUMNS", "4"),
            ("MOSAIC_CONNECT_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 2000);
        assert_eq!(config.buddy, Some(PeerId::new("10.0.0.1", 1099)));
        assert_eq!((config.rows, config.columns), (4, 4));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_environment_value_is_an_error() {
        let err = PeerConfig::from_lookup(lookup(&[("MOSAIC_PORT", "lots")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref m) if m.contains("MOSAIC_PORT")));
    }

    #[test]
    fn flags_override() {
        let mut config = PeerConfig::default();
        config
            .apply_args(["-h", "peer-b", "-p", "1100", "-H", "peer-a", "-P", "1099"])
            .unwrap();
        assert_eq!(config.host, "peer-b");
        assert_eq!(config.port, 1100);
        assert_eq!(config.buddy, Some(PeerId::new("peer-a", 1099)));
    }

    #[test]
    fn buddy_port_alone_uses_default_host() {
        let mut config = PeerConfig::default();
        config.apply_args(["-P", "1200"]).unwrap();
        assert_eq!(config.buddy, Some(PeerId::new(DEFAULT_HOST, 1200)));
    }

    #[test]
    fn flag_overrides_only_half_of_env_buddy() {
        let mut config =
            PeerConfig::from_lookup(lookup(&[("MOSAIC_BUDDY", "peer-a:1099")])).unwrap();
        config.apply_args(["-P", "1300"]).unwrap();
        assert_eq!(config.buddy, Some(PeerId::new("peer-a", 1300)));
    }

    #[test]
    fn malformed_flags_are_errors() {
        let mut config = PeerConfig::default();
        assert!(config.apply_args(["-p"]).is_err());
        assert!(config.apply_args(["-x", "1"]).is_err());
        assert!(config.apply_args(["-p", "not-a-port"]).is_err());
    }
}
