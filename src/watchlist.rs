use crate::{
    address::AccountAddress,
    config::Network,
};
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};

pub const WATCH_ROOT: &str = ".lottery-sync";
const WATCH_FILE: &str = "watched.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedGame {
    pub watched_at: String,
    pub creator: AccountAddress,
    pub module: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl WatchedGame {
    pub fn now(creator: AccountAddress, module: impl Into<String>) -> Self {
        Self {
            watched_at: Utc::now().to_rfc3339(),
            creator,
            module: module.into(),
            label: None,
        }
    }
}

/// Games previously watched on one network, oldest first.
#[derive(Debug)]
pub struct WatchStore {
    path: PathBuf,
}

impl WatchStore {
    pub fn new(network: Network) -> Result<Self> {
        Self::in_root(WATCH_ROOT, network)
    }

    pub fn in_root(root: impl AsRef<Path>, network: Network) -> Result<Self> {
        let path = ensure_store(root.as_ref(), network)?;
        Ok(Self { path })
    }

    pub fn load(&self) -> Result<Vec<WatchedGame>> {
        read_records(&self.path)
    }

    /// Adds `game`, replacing an older entry for the same creator and module.
    pub fn remember(&self, game: WatchedGame) -> Result<()> {
        let mut games = self.load()?;
        games.retain(|g| !(g.creator == game.creator && g.module == game.module));
        games.push(game);
        write_records(&self.path, &games)
    }

    pub fn latest(&self, module: &str) -> Result<Option<WatchedGame>> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|g| g.module == module))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_store(root: &Path, network: Network) -> Result<PathBuf> {
    let network_dir = root.join(network.dir_name());
    if !network_dir.exists() {
        fs::create_dir_all(&network_dir).wrap_err_with(|| {
            format!("Failed to create watch directory {}", network_dir.display())
        })?;
    }

    let file_path = network_dir.join(WATCH_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).wrap_err_with(|| {
            format!(
                "Failed to create watch list for {} at {:?}",
                network, file_path
            )
        })?;
        file.write_all(b"[]")
            .wrap_err_with(|| format!("Failed to initialize watch list for {}", network))?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<WatchedGame>> {
    let data = fs::read(path.as_ref()).wrap_err("Failed to read watch list")?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice::<Vec<WatchedGame>>(&data).wrap_err("Failed to parse watch list JSON")
}

fn write_records(path: impl AsRef<Path>, games: &[WatchedGame]) -> Result<()> {
    let json = serde_json::to_vec_pretty(games).wrap_err("Failed to serialize watch list")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write watch list")?;
    Ok(())
}
