//! Server configuration.
//!
//! Loaded from a TOML file (`config.toml` by default, overridable through the
//! `CONFIG` environment variable). Values of the form `$NAME` or `${NAME}`
//! are expanded from the environment before parsing, so secrets such as the
//! pool key stay out of the file itself. A missing file is not an error; the
//! server then runs entirely on defaults and environment overrides.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8402
//! network = "solana-devnet"
//! rpc_url = "https://api.devnet.solana.com"
//! pool_private_key = "$POOL_PRIVATE_KEY"
//! redis_url = "${REDIS_URL}"
//!
//! [settlement]
//! fee_rate = "0.02"
//! minimum_amount = "10"
//!
//! [webhook]
//! url = "https://merchant.example/hooks/settlement"
//! secret = "$WEBHOOK_SECRET"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::settlement::SettlementPolicy;

/// Default TCP port the facilitator binds.
pub const DEFAULT_PORT: u16 = 8402;

/// Runtime configuration for the facilitator binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener on.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind the HTTP listener on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Network name the pool wallet operates on (see `tollgate::networks`).
    #[serde(default = "default_network")]
    pub network: String,

    /// RPC endpoint for that network.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Base58-encoded private key of the pool wallet. Usually written as
    /// `$POOL_PRIVATE_KEY` in the file and injected through the environment.
    #[serde(default)]
    pub pool_private_key: String,

    /// Redis connection URL. When absent the server falls back to in-memory
    /// stores, which only hold up for a single process.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Per-request deadline for ledger queries, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Settlement fee and cadence policy.
    #[serde(default)]
    pub settlement: SettlementPolicy,

    /// Webhook endpoint notified when settlements complete.
    #[serde(default)]
    pub webhook: Option<WebhookSection>,
}

/// Signed webhook delivery target.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSection {
    /// URL that receives the signed event payloads.
    pub url: String,
    /// Shared secret used to compute the payload signature.
    pub secret: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_network() -> String {
    tollgate::networks::DEVNET.to_owned()
}

fn default_rpc_url() -> String {
    "https://api.devnet.solana.com".to_owned()
}

fn default_request_timeout_secs() -> u64 {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            network: default_network(),
            rpc_url: default_rpc_url(),
            pool_private_key: String::new(),
            redis_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            settlement: SettlementPolicy::default(),
            webhook: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the path named by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        let mut config = Self::load_from(Path::new(&path))?;

        if let Ok(host) = std::env::var("HOST") {
            config.host = host
                .parse()
                .map_err(|_| ConfigError::InvalidOverride("HOST", host))?;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidOverride("PORT", port))?;
        }

        Ok(config)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(ConfigError::Io(err)),
        };
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }

    /// The socket address formed from `host` and `port`.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML or has a wrong shape.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid {0} override: {1}")]
    InvalidOverride(&'static str, String),
}

/// Expands `$NAME` and `${NAME}` references from the environment.
///
/// Unset variables are left in place verbatim so that a later validation step
/// can tell "not configured" apart from an empty value.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(body) = after.strip_prefix('{') {
            match body.find('}') {
                Some(end) => (&body[..end], end + 2),
                None => {
                    // unterminated brace, keep the dollar literally
                    out.push('$');
                    rest = after;
                    continue;
                }
            }
        } else {
            let end = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }

        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}
