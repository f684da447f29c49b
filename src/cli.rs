use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::api::client::DEFAULT_BASE_URL;
use crate::hosting::sync::DEFAULT_WORKERS;

pub const DEFAULT_PROFILE: &str = "default";
/// Whole-request timeout; it has to cover streaming large asset uploads.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

#[derive(Parser)]
#[command(name = "realm-cli")]
#[command(about = "Manage MongoDB Realm apps from the command line")]
pub struct Cli {
    /// Admin API base URL
    #[arg(long, global = true, env = "REALM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Name of the stored login to use
    #[arg(long, global = true, env = "REALM_PROFILE", default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// HTTP timeout in seconds
    #[arg(
        long,
        global = true,
        env = "REALM_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub timeout: u64,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session in the system keyring
    Login {
        /// Cloud API public key, or local user name with --password
        #[arg(long, env = "REALM_USERNAME")]
        username: String,

        /// Cloud API private key
        #[arg(long, env = "REALM_API_KEY", conflicts_with = "password")]
        api_key: Option<String>,

        /// Password for a local user
        #[arg(long)]
        password: Option<String>,
    },

    /// Revoke the current session and forget stored credentials
    Logout,

    /// Show the stored login
    Whoami,

    /// Static hosting assets
    #[command(subcommand)]
    Hosting(HostingCommand),

    /// App secrets
    #[command(subcommand)]
    Secrets(SecretsCommand),
}

#[derive(Args, Clone)]
pub struct AppArgs {
    /// Atlas project (group) ID
    #[arg(long)]
    pub group_id: String,

    /// Internal app ID
    #[arg(long)]
    pub app_id: String,
}

#[derive(Subcommand)]
pub enum HostingCommand {
    /// List hosted assets
    List {
        #[command(flatten)]
        app: AppArgs,
    },

    /// Show what an import would change
    Diff {
        #[command(flatten)]
        app: AppArgs,

        /// App directory containing hosting/files
        #[arg(long)]
        app_dir: PathBuf,

        /// Keep remote assets that are missing locally
        #[arg(long)]
        merge: bool,
    },

    /// Upload local changes to hosting
    Import {
        #[command(flatten)]
        app: AppArgs,

        /// App directory containing hosting/files
        #[arg(long)]
        app_dir: PathBuf,

        /// Keep remote assets that are missing locally
        #[arg(long)]
        merge: bool,

        /// Invalidate the hosting cache after a successful import
        #[arg(long)]
        reset_cache: bool,

        /// Number of concurrent uploads
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },

    /// Download hosted assets and their attributes into an app directory
    Export {
        #[command(flatten)]
        app: AppArgs,

        /// App directory to write hosting/files and hosting/metadata.json into
        #[arg(long)]
        app_dir: PathBuf,

        /// Number of concurrent downloads
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },

    /// Invalidate the hosting cache
    Invalidate {
        #[command(flatten)]
        app: AppArgs,

        /// Path pattern to invalidate
        #[arg(long, default_value = "/*")]
        path: String,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct SecretSelector {
    /// Secret ID
    #[arg(long)]
    pub id: Option<String>,

    /// Secret name
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Subcommand)]
pub enum SecretsCommand {
    /// List secret names
    List {
        #[command(flatten)]
        app: AppArgs,
    },

    /// Create a secret
    Add {
        #[command(flatten)]
        app: AppArgs,

        #[arg(long)]
        name: String,

        #[arg(long)]
        value: String,
    },

    /// Change a secret's value
    Update {
        #[command(flatten)]
        app: AppArgs,

        #[command(flatten)]
        secret: SecretSelector,

        #[arg(long)]
        value: String,
    },

    /// Delete a secret
    Remove {
        #[command(flatten)]
        app: AppArgs,

        #[command(flatten)]
        secret: SecretSelector,
    },
}
