//! AeroDrive CLI — Drive-backed vault companion
//!
//! Usage:
//!   aerodrive-cli login --refresh-token <token>   Store credentials
//!   aerodrive-cli ls [folder]                     List a folder
//!   aerodrive-cli find <query> [folder]           Search by name
//!   aerodrive-cli get <file-id> [local]           Download file
//!   aerodrive-cli put <local> [folder]            Upload file
//!   aerodrive-cli watch [folder]                  Follow a folder

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use aerodrive::{
    DriveClient, DriveConfig, FileRecord, FileTokenStore, FolderSession, NoopSink, SortKey,
    SortOrder, StoredTokens, SyncLoop, ROOT_FOLDER_ID,
};

#[derive(Parser)]
#[command(
    name = "aerodrive-cli",
    about = "AeroDrive CLI — Drive-backed vault companion",
    version,
    long_about = "Browses, uploads and downloads files in the Drive account backing an AeroDrive vault.\nCredentials: --client-id/--client-secret or AERODRIVE_CLIENT_ID/AERODRIVE_CLIENT_SECRET."
)]
struct Cli {
    /// OAuth2 client id (falls back to AERODRIVE_CLIENT_ID)
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// OAuth2 client secret (falls back to AERODRIVE_CLIENT_SECRET)
    #[arg(long, global = true)]
    client_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a refresh token for later calls
    Login {
        /// OAuth2 refresh token obtained from the consent flow
        #[arg(long)]
        refresh_token: String,
    },
    /// Forget stored tokens
    Logout,
    /// List files and folders
    Ls {
        /// Folder id (default: root)
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder: String,
        /// Sort by: name, size, modified, mimetype
        #[arg(long)]
        sort: Option<String>,
        /// Reverse the sort order
        #[arg(long)]
        desc: bool,
    },
    /// Search a folder by file name
    Find {
        /// Name fragment to search for
        query: String,
        /// Folder id (default: root)
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder: String,
    },
    /// Download a file
    Get {
        /// Remote file id
        file_id: String,
        /// Local destination (default: the remote file name)
        local: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        /// Local file path
        local: PathBuf,
        /// Destination folder id (default: root)
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder: String,
    },
    /// Create a folder
    Mkdir {
        /// New folder name
        name: String,
        /// Parent folder id (default: root)
        #[arg(default_value = ROOT_FOLDER_ID)]
        parent: String,
    },
    /// Delete a file or folder
    Rm {
        /// Remote file id
        file_id: String,
    },
    /// Rename a file or folder
    Rename {
        /// Remote file id
        file_id: String,
        /// New name
        new_name: String,
    },
    /// Move a file to another folder
    Mv {
        /// Remote file id
        file_id: String,
        /// Destination folder id
        folder: String,
    },
    /// Show storage quota
    Quota,
    /// Periodically re-list a folder until interrupted
    Watch {
        /// Folder id (default: root)
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder: String,
        /// Refresh interval in seconds
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
}

fn credential(flag: Option<String>, env_key: &str) -> anyhow::Result<String> {
    flag.or_else(|| std::env::var(env_key).ok())
        .with_context(|| format!("missing credential: pass the flag or set {}", env_key))
}

fn parse_sort(raw: &str) -> anyhow::Result<SortKey> {
    match raw.to_lowercase().as_str() {
        "name" => Ok(SortKey::Name),
        "size" => Ok(SortKey::Size),
        "modified" => Ok(SortKey::Modified),
        "mimetype" => Ok(SortKey::MimeType),
        other => anyhow::bail!("unknown sort key '{}' (name|size|modified|mimetype)", other),
    }
}

fn print_listing(folders: &[FileRecord], files: &[FileRecord]) {
    for folder in folders {
        println!("{:<44}  {:>10}  {}", folder.id, "<dir>", folder.name);
    }
    for file in files {
        println!("{:<44}  {:>10}  {}", file.id, file.size_bytes, file.name);
    }
    println!("{} folder(s), {} file(s)", folders.len(), files.len());
}

fn transfer_bar(total: u64) -> ProgressBar {
    let bar = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {bytes}/{total_bytes} {bytes_per_sec}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();

    let client_id = credential(cli.client_id.clone(), "AERODRIVE_CLIENT_ID")?;
    let client_secret = credential(cli.client_secret.clone(), "AERODRIVE_CLIENT_SECRET")?;
    let config = DriveConfig::new(&client_id, &client_secret);

    let store = Arc::new(FileTokenStore::default_path()?);
    let client = Arc::new(DriveClient::new(config, store)?);

    match cli.command {
        Commands::Login { refresh_token } => {
            // An already-expired access token forces a refresh grant on the
            // next call, which validates the refresh token.
            client
                .tokens()
                .install(StoredTokens {
                    access_token: String::new(),
                    refresh_token: Some(refresh_token),
                    expires_at: Some(0),
                })
                .await?;
            client.storage_quota().await.context("refresh token was rejected")?;
            println!("Login OK");
        }
        Commands::Logout => {
            client.tokens().logout().await?;
            println!("Logged out");
        }
        Commands::Ls { folder, sort, desc } => {
            let session = FolderSession::new(Arc::clone(&client), Arc::new(NoopSink));
            session.navigate_to(&folder).await?;
            if let Some(raw) = sort {
                let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
                session.sort_by(parse_sort(&raw)?, order).await;
            }
            let listing = session.snapshot().await;
            print_listing(&listing.folders, &listing.files);
        }
        Commands::Find { query, folder } => {
            let session = FolderSession::new(Arc::clone(&client), Arc::new(NoopSink));
            session.navigate_to(&folder).await?;
            session.refresh(&query).await?;
            let listing = session.snapshot().await;
            print_listing(&listing.folders, &listing.files);
        }
        Commands::Get { file_id, local } => {
            let record = client.get_file(&file_id).await?;
            let target = local.unwrap_or_else(|| PathBuf::from(&record.name));
            let bar = transfer_bar(record.size_bytes);
            let progress = bar.clone();
            client
                .download_to_path(
                    &file_id,
                    &target,
                    Some(Box::new(move |done, _total| progress.set_position(done))),
                )
                .await?;
            bar.finish();
            println!("Downloaded {} to {}", record.name, target.display());
        }
        Commands::Put { local, folder } => {
            let bar = ProgressBar::new_spinner();
            bar.set_message(format!("Uploading {}", local.display()));
            let record = client.upload_file(&local, &folder).await?;
            bar.finish_and_clear();
            println!("Uploaded {} ({} bytes, id {})", record.name, record.size_bytes, record.id);
        }
        Commands::Mkdir { name, parent } => {
            let record = client.create_folder(&name, &parent).await?;
            println!("Created folder {} (id {})", record.name, record.id);
        }
        Commands::Rm { file_id } => {
            client.delete_file(&file_id).await?;
            println!("Deleted {}", file_id);
        }
        Commands::Rename { file_id, new_name } => {
            client.rename_file(&file_id, &new_name).await?;
            println!("Renamed {} to {}", file_id, new_name);
        }
        Commands::Mv { file_id, folder } => {
            client.move_file(&file_id, &folder).await?;
            println!("Moved {} to {}", file_id, folder);
        }
        Commands::Quota => {
            let quota = client.storage_quota().await?;
            if quota.total_bytes == 0 {
                println!("{} bytes used (unlimited quota)", quota.used_bytes);
            } else {
                println!(
                    "{} / {} bytes used ({:.1}%)",
                    quota.used_bytes,
                    quota.total_bytes,
                    quota.percentage()
                );
            }
        }
        Commands::Watch { folder, interval } => {
            let session = Arc::new(FolderSession::new(Arc::clone(&client), Arc::new(WatchSink)));
            session.navigate_to(&folder).await?;

            let sync = SyncLoop::new(Arc::clone(&session), Arc::clone(&client), Arc::new(WatchSink));
            sync.start(Duration::from_secs(interval.max(1)));
            println!("Watching folder {} every {}s, Ctrl-C to stop", folder, interval);

            tokio::signal::ctrl_c().await?;
            sync.stop();
        }
    }

    Ok(())
}

/// Sink that prints listing and quota updates as the sync loop reports them
struct WatchSink;

impl aerodrive::UiSink for WatchSink {
    fn on_list_updated(&self, update: aerodrive::ListUpdate) {
        println!(
            "[{}] {} folder(s), {} file(s)",
            update.current_folder_id,
            update.folders.len(),
            update.files.len()
        );
    }

    fn on_storage_updated(&self, usage: aerodrive::StorageUsage) {
        println!(
            "[storage] {} / {} bytes ({:.1}%)",
            usage.used_bytes, usage.total_bytes, usage.percentage
        );
    }

    fn on_sync_state_changed(&self, _is_syncing: bool) {}
}
