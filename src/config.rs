use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api::client::{AuthClient, HttpExecutor};
use crate::cli::Cli;
use crate::credentials::{KeyringStore, SessionStore};

const CONFIG_DIR_NAME: &str = "realm-cli";
const HOSTING_CACHE_FILE: &str = "hosting-cache.json";

/// Settings for one invocation, resolved from the command line once.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub profile: String,
    pub timeout: Duration,
    /// Directory holding per-profile state such as the hosting hash cache.
    pub state_dir: PathBuf,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(Self::with_state_root(cli, config_dir.join(CONFIG_DIR_NAME)))
    }

    fn with_state_root(cli: &Cli, root: PathBuf) -> Self {
        Self {
            base_url: cli.base_url.trim_end_matches('/').to_string(),
            profile: cli.profile.clone(),
            timeout: Duration::from_secs(cli.timeout),
            state_dir: root.join(&cli.profile),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.state_dir.join(HOSTING_CACHE_FILE)
    }

    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::new(KeyringStore::new(&self.profile))
    }

    pub fn executor(&self) -> Result<HttpExecutor> {
        HttpExecutor::new(self.timeout).context("Failed to build HTTP client")
    }

    /// Client for the stored session; fails when nobody is logged in.
    pub fn client(&self) -> Result<AuthClient> {
        let store = self.session_store();
        let credentials = store.load()?;
        if !credentials.logged_in() {
            anyhow::bail!("Not logged in. Run `realm-cli login` first");
        }

        Ok(AuthClient::new(
            &self.base_url,
            self.executor()?,
            credentials,
            store,
        ))
    }
}
