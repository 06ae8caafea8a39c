use crate::{
    address::AccountAddress,
    backoff::BackoffPolicy,
    endpoints::{
        Endpoint,
        EndpointSelector,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    bail,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::Path,
    time::Duration,
};
use url::Url;

pub const DEFAULT_MODULE_ADDRESS: &str =
    "0x720757d34c77743730715fcf091f456e6840e32a077014d6883983ff7323c3ea";
pub const DEFAULT_MODULE_NAME: &str = "carlbundy9";

/// `Duration` <-> integer milliseconds.
pub mod millis {
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
    };
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Devnet,
    Local,
}

impl Network {
    pub fn dir_name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
            Network::Local => "local",
        }
    }

    pub fn default_endpoints(self) -> Vec<Endpoint> {
        let urls: Vec<String> = match self {
            Network::Local => vec!["http://127.0.0.1:8080/v1".to_string()],
            net => {
                let name = net.dir_name();
                vec![
                    format!("https://api.{name}.aptoslabs.com/v1"),
                    format!("https://fullnode.{name}.aptoslabs.com/v1"),
                ]
            }
        };
        urls.into_iter().map(Endpoint::new).collect()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
            Network::Devnet => "Devnet",
            Network::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// How the game is read off the ledger.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Fetch the account resources directly.
    #[default]
    Resources,
    /// Call the module's view functions.
    View,
}

/// Scheduler timings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(rename = "active_poll_ms", with = "millis")]
    pub active_poll: Duration,
    #[serde(rename = "idle_poll_ms", with = "millis")]
    pub idle_poll: Duration,
    #[serde(rename = "tick_ms", with = "millis")]
    pub tick: Duration,
    #[serde(rename = "debounce_ms", with = "millis")]
    pub debounce: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            active_poll: Duration::from_secs(5),
            idle_poll: Duration::from_secs(10),
            tick: Duration::from_secs(1),
            debounce: Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self, game_active: bool) -> Duration {
        if game_active {
            self.active_poll
        } else {
            self.idle_poll
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub network: Network,
    /// Empty means the network's public fullnodes.
    pub endpoints: Vec<Endpoint>,
    pub module_address: AccountAddress,
    pub module_name: String,
    pub creator: Option<AccountAddress>,
    pub read_mode: ReadMode,
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    pub sync: SyncConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            endpoints: Vec::new(),
            module_address: DEFAULT_MODULE_ADDRESS
                .parse()
                .unwrap_or(AccountAddress::ZERO),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            creator: None,
            read_mode: ReadMode::default(),
            request_timeout: Duration::from_secs(10),
            sync: SyncConfig::default(),
        }
    }
}

impl WatchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&data)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn effective_endpoints(&self) -> Vec<Endpoint> {
        if self.endpoints.is_empty() {
            self.network.default_endpoints()
        } else {
            self.endpoints.clone()
        }
    }

    pub fn selector(&self) -> Result<EndpointSelector> {
        EndpointSelector::new(self.effective_endpoints()).map_err(|err| eyre!(err))
    }

    pub fn creator(&self) -> Result<AccountAddress> {
        self.creator
            .ok_or_else(|| eyre!("No creator address given; pass --creator or set `creator` in the config"))
    }

    /// `0x…::module` prefix of the game's Move types and functions.
    pub fn module_path(&self) -> String {
        format!("{}::{}", self.module_address, self.module_name)
    }

    pub fn validate(&self) -> Result<()> {
        for endpoint in self.effective_endpoints() {
            let url = Url::parse(endpoint.as_str())
                .wrap_err_with(|| format!("Invalid ledger endpoint `{endpoint}`"))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("Ledger endpoint `{endpoint}` must use http or https");
            }
        }
        if self.module_name.is_empty() {
            bail!("Module name must not be empty");
        }
        if self.sync.active_poll.is_zero() || self.sync.idle_poll.is_zero() || self.sync.tick.is_zero()
        {
            bail!("Poll and tick intervals must be non-zero");
        }
        let backoff = &self.sync.backoff;
        if backoff.floor.is_zero() {
            bail!("Backoff floor must be non-zero");
        }
        if backoff.factor < 1 || backoff.rate_limit_factor < 1 {
            bail!("Backoff factors must be at least 1");
        }
        if backoff.ceiling < backoff.floor || backoff.rate_limit_ceiling < backoff.floor {
            bail!("Backoff ceilings must not be below the floor");
        }
        self.creator()?;
        Ok(())
    }
}
