use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use lottery_sync::{
    AccountAddress,
    config::{
        Network,
        ReadMode,
        WatchConfig,
    },
    endpoints::Endpoint,
    telemetry,
    watchlist::{
        WatchStore,
        WatchedGame,
    },
};
use std::path::PathBuf;

mod client;
mod ui;

/// Follows one on-chain lottery game and keeps its state current.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, value_enum)]
    network: Option<Network>,

    /// Ledger REST endpoint; repeat to rotate across several.
    #[arg(short, long = "endpoint")]
    endpoints: Vec<Endpoint>,

    /// Account that created the game.
    #[arg(short, long)]
    creator: Option<AccountAddress>,

    #[arg(long)]
    module_address: Option<AccountAddress>,

    #[arg(long)]
    module_name: Option<String>,

    #[arg(long, value_enum)]
    read_mode: Option<ReadMode>,

    /// JSON watch config; `~` is expanded.
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Log state changes instead of drawing the viewer.
    #[arg(long, default_value = "false")]
    headless: bool,

    /// Save the creator in the local watch list.
    #[arg(long, default_value = "false")]
    remember: bool,
}

impl Args {
    fn into_config(self) -> Result<(WatchConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::load(shellexpand::tilde(path).into_owned())?,
            None => WatchConfig::default(),
        };
        if let Some(network) = self.network {
            config.network = network;
        }
        if !self.endpoints.is_empty() {
            config.endpoints = self.endpoints;
        }
        if let Some(creator) = self.creator {
            config.creator = Some(creator);
        }
        if let Some(module_address) = self.module_address {
            config.module_address = module_address;
        }
        if let Some(module_name) = self.module_name {
            config.module_name = module_name;
        }
        if let Some(read_mode) = self.read_mode {
            config.read_mode = read_mode;
        }
        Ok((config, self.remember))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let headless = args.headless;
    let _guard = telemetry::init_tracing(&args.log_dir)?;
    let (mut config, remember) = args.into_config()?;

    let store = WatchStore::new(config.network)?;
    let module = config.module_path();
    if config.creator.is_none() {
        config.creator = store.latest(&module)?.map(|game| game.creator);
        if let Some(creator) = config.creator {
            tracing::info!(%creator, path = %store.path().display(), "using last watched game");
        }
    }
    config.validate().wrap_err("Invalid watch configuration")?;
    let creator = config.creator()?;
    if remember {
        store.remember(WatchedGame::now(creator, module))?;
    }

    client::run_app(config, creator, headless).await
}
