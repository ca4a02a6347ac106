//! anisync-cli - Command-line interface for anisync
//!
//! Mask tools run locally; lookups log in, send one request, print the
//! result and log out again.

mod commands;

use anisync_client::{Config, ConnectionConfig, SyncClient};
use anisync_core::{Credentials, MemoryCatalog, MemoryPacketStore};
use anisync_protocol::{FieldLayout, ANIME_AMASK, FILE_AMASK, FILE_FMASK};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anisync-cli")]
#[command(about = "Command-line interface for the anisync catalog client")]
#[command(version)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long, env = "ANISYNC_SERVER_ADDR")]
    server: Option<String>,

    /// Account name
    #[arg(short, long, env = "ANISYNC_USER")]
    user: Option<String>,

    /// Account password
    #[arg(short, long, env = "ANISYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Local UDP port (0 = any)
    #[arg(long, env = "ANISYNC_LOCAL_PORT")]
    local_port: Option<u16>,

    /// Seconds to wait for an answer
    #[arg(short, long, default_value = "60")]
    timeout: u64,

    /// Print records as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Mask layouts.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Layout {
    /// ANIME amask (7 bytes)
    Anime,
    /// FILE fmask (4 bytes)
    Fmask,
    /// FILE amask (4 bytes)
    FileAnime,
}

impl Layout {
    pub fn fields(self) -> &'static FieldLayout {
        match self {
            Layout::Anime => &ANIME_AMASK,
            Layout::Fmask => &FILE_FMASK,
            Layout::FileAnime => &FILE_AMASK,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mask tools (no server connection)
    Mask {
        #[command(subcommand)]
        command: MaskCommand,
    },

    /// Ping the server
    Ping,

    /// Look up an anime
    Anime {
        /// Anime ID
        aid: u64,

        /// Fields to request (comma separated, default: a common set)
        #[arg(short, long, value_delimiter = ',')]
        fields: Option<Vec<String>>,
    },

    /// Look up a file by size and ed2k hash, or by file ID
    File {
        /// File size in bytes
        #[arg(long, requires = "ed2k", conflicts_with = "fid")]
        size: Option<u64>,

        /// ed2k hash
        #[arg(long, requires = "size")]
        ed2k: Option<String>,

        /// File ID
        #[arg(long)]
        fid: Option<u64>,

        /// File fields (comma separated)
        #[arg(long, value_delimiter = ',')]
        fmask: Option<Vec<String>>,

        /// Anime fields of the file (comma separated)
        #[arg(long, value_delimiter = ',')]
        amask: Option<Vec<String>>,
    },

    /// Look up an episode
    Episode {
        /// Episode ID
        eid: u64,
    },

    /// Look up a release group
    Group {
        /// Group ID
        gid: u64,
    },

    /// Look up a mylist entry
    Mylist {
        /// Mylist ID
        lid: u64,
    },

    /// Add a file to the mylist (or update it if already there)
    MylistAdd {
        /// File size in bytes
        #[arg(long)]
        size: u64,

        /// ed2k hash
        #[arg(long)]
        ed2k: String,

        /// Mark as watched
        #[arg(long)]
        viewed: bool,

        /// Storage state (0 unknown, 1 internal, 2 external, 3 deleted)
        #[arg(long)]
        state: Option<u8>,

        /// Storage label
        #[arg(long)]
        storage: Option<String>,
    },

    /// Queue a mylist export and wait for the download link
    Export {
        /// Export template name
        #[arg(default_value = "xml-plain-cs")]
        template: String,
    },
}

#[derive(Subcommand)]
pub enum MaskCommand {
    /// Encode field names into a mask
    Encode {
        #[arg(value_enum)]
        layout: Layout,
        /// Field names
        #[arg(required = true, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// List the fields selected by a mask
    Decode {
        #[arg(value_enum)]
        layout: Layout,
        /// Hex mask
        mask: String,
    },

    /// List every field of a layout with its bit
    Fields {
        #[arg(value_enum)]
        layout: Layout,
    },

    /// Map a reply data line onto a mask
    Apply {
        #[arg(value_enum)]
        layout: Layout,
        /// Hex mask
        mask: String,
        /// Pipe separated data line
        line: String,
        /// The reply was cut off at the size ceiling
        #[arg(long)]
        truncated: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Mask tools need no connection
    if let Commands::Mask { command } = &cli.command {
        match commands::mask(command) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = Config::from_env();
    let mut conn = ConnectionConfig::new(cli.server.clone().unwrap_or_else(|| config.server.addr()))
        .with_local_port(cli.local_port.unwrap_or(config.server.local_port))
        .with_engine(config.engine_config());
    match (&cli.user, &cli.password) {
        (Some(user), Some(password)) => {
            conn = conn.with_credentials(Credentials::new(user, password));
        }
        (None, None) => {}
        _ => {
            eprintln!(
                "{}: --user and --password must be used together",
                "Error".red()
            );
            std::process::exit(1);
        }
    }

    let catalog = Arc::new(MemoryCatalog::new());
    let mut client = SyncClient::connect(&conn, MemoryPacketStore::new(), catalog.clone())
        .await
        .map_err(|e| {
            eprintln!("{}: {}", "Connection failed".red(), e);
            e
        })?;

    let timeout = Duration::from_secs(cli.timeout);
    let result = commands::execute(&mut client, &catalog, cli.command, timeout, cli.json).await;
    commands::logout(&mut client).await;

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
    Ok(())
}
