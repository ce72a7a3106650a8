//! Server configuration.
//!
//! Two knobs: where to listen and how long shutdown may wait for in-flight
//! requests. Both have defaults and both can come from the environment:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `TUPA_LISTEN_ADDR` | `:6969` | `host:port`; an empty host means every interface |
//! | `TUPA_SHUTDOWN_GRACE_SECS` | `10` | graceful-shutdown grace period, whole seconds |

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_LISTEN_ADDR: &str = ":6969";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

const ENV_LISTEN_ADDR: &str = "TUPA_LISTEN_ADDR";
const ENV_GRACE_SECS: &str = "TUPA_SHUTDOWN_GRACE_SECS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by whichever `TUPA_*` variables are set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
            config.listen_addr = addr;
        }
        if let Some(secs) = lookup(ENV_GRACE_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{ENV_GRACE_SECS}={secs:?}: {e}")))?;
            config.grace_period = Duration::from_secs(secs);
        }
        // Fail early on malformed input; name lookup waits for bind time.
        normalize_listen_addr(&config.listen_addr)?;
        Ok(config)
    }
}

/// Checks the `host:port` shape and fills in an empty host. `":6969"`
/// becomes `"0.0.0.0:6969"`.
fn normalize_listen_addr(addr: &str) -> Result<String, Error> {
    let invalid = |reason: &str| Error::InvalidAddress { addr: addr.to_owned(), reason: reason.to_owned() };

    let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    port.parse::<u16>().map_err(|e| invalid(&format!("bad port: {e}")))?;
    if host.is_empty() {
        return Ok(format!("0.0.0.0:{port}"));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(invalid("host contains whitespace"));
    }
    Ok(addr.to_owned())
}

/// Resolves a listen address, looking up host names. `":6969"` binds every
/// interface; `"localhost:6969"` binds whatever `localhost` resolves to first.
pub async fn resolve_listen_addr(addr: &str) -> Result<SocketAddr, Error> {
    let full = normalize_listen_addr(addr)?;
    let mut addrs = tokio::net::lookup_host(full.as_str()).await.map_err(|e| Error::InvalidAddress {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?;
    addrs.next().ok_or_else(|| Error::InvalidAddress {
        addr: addr.to_owned(),
        reason: "name resolved to no addresses".to_owned(),
    })
}
