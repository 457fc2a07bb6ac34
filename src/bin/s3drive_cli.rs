//! S3 Drive CLI - personal file manager over an S3 bucket
//!
//! Usage:
//!   s3drive-cli ls [path]                  List a folder
//!   s3drive-cli mkdir <path>               Create a folder
//!   s3drive-cli put <local>... [--to dir]  Upload files
//!   s3drive-cli get <path> [local]         Download a file, or a folder as zip
//!   s3drive-cli rm <path>...               Delete files and folders
//!   s3drive-cli zip <dir> <name>...        Archive entries of one folder
//!   s3drive-cli link <path> [--download]   Print a signed link
//!   s3drive-cli config show|path|init      Manage the configuration
//!
//! Secrets are read from S3DRIVE_SECRET_ACCESS_KEY, S3DRIVE_SESSION_TOKEN
//! and S3DRIVE_ID_TOKEN.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::Level;

use s3drive::config::{get_config_path, load_config_from, save_config_to};
use s3drive::events::{TransferDirection, TransferEventType};
use s3drive::model::format_bytes;
use s3drive::{
    DownloadOutcome, DriveConfig, DriveEvent, DriveSession, EntryId, FolderPath, IdentityConfig,
    IdentitySecrets, LinkMode, NotificationLevel, UploadFile,
};

#[derive(Parser)]
#[command(
    name = "s3drive-cli",
    about = "S3 Drive CLI - personal file manager over an S3 bucket",
    version,
    long_about = "Every path is relative to your own drive root.\nFolders are written as a/b, the root as /"
)]
struct Cli {
    /// Configuration file (default: <config dir>/s3drive/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder
    Ls {
        /// Folder path (default: /)
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a folder
    Mkdir {
        /// Path of the new folder
        path: String,
    },
    /// Upload local files into a folder
    Put {
        /// Local files
        #[arg(required = true)]
        local: Vec<PathBuf>,
        /// Destination folder (default: /)
        #[arg(long, default_value = "/")]
        to: String,
    },
    /// Download a file, or a folder as a zip archive
    Get {
        /// Remote path
        remote: String,
        /// Local directory (default: current directory)
        #[arg(default_value = ".")]
        local: PathBuf,
    },
    /// Delete files and folders
    Rm {
        /// Remote paths
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Archive several entries of one folder into a zip file
    Zip {
        /// Folder holding the entries
        folder: String,
        /// Entry names inside the folder
        #[arg(required = true)]
        names: Vec<String>,
        /// Local directory (default: current directory)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Print a signed link to a file
    Link {
        /// Remote path
        path: String,
        /// Link that downloads instead of displaying
        #[arg(long)]
        download: bool,
    },
    /// Show or create the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Write a configuration with static keys
    Init {
        #[arg(long)]
        bucket: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        /// S3-compatible endpoint (MinIO, R2, ...)
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        path_style: bool,
        /// Namespace root of this user
        #[arg(long)]
        root: String,
        #[arg(long)]
        access_key_id: String,
    },
}

/// Split `a/b/c` into the folder `a/b` and the entry name `c`
fn split_path(path: &str) -> anyhow::Result<(FolderPath, String)> {
    let mut folder = FolderPath::parse(path);
    let name = folder
        .name()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("'{}' does not name a file or folder", path))?;
    folder.truncate(folder.depth() - 1);
    Ok((folder, name))
}

/// Open `folder` and find `name` in it
async fn locate(session: &DriveSession, folder: FolderPath, name: &str) -> anyhow::Result<EntryId> {
    session.navigate(folder).await?;
    let view = session.view().ok_or_else(|| anyhow!("Folder listing unavailable"))?;
    if view.folders.iter().any(|f| f == name) {
        Ok(EntryId::folder(name))
    } else if view.file(name).is_some() {
        Ok(EntryId::file(name))
    } else {
        bail!("'{}' not found", name)
    }
}

fn secrets_from_env() -> IdentitySecrets {
    IdentitySecrets {
        secret_access_key: std::env::var("S3DRIVE_SECRET_ACCESS_KEY").ok().map(SecretString::from),
        session_token: std::env::var("S3DRIVE_SESSION_TOKEN").ok().map(SecretString::from),
        id_token: std::env::var("S3DRIVE_ID_TOKEN").ok().map(SecretString::from),
    }
}

fn bar_style(direction: TransferDirection) -> ProgressStyle {
    let template = match direction {
        TransferDirection::Archive => "{spinner} {msg} [{bar:30}] {pos}/{len} items",
        _ => "{spinner} {msg} [{bar:30}] {bytes}/{total_bytes}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Render transfer events as progress bars and notifications as lines
async fn render_events(mut rx: UnboundedReceiver<DriveEvent>) {
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            DriveEvent::Transfer(transfer) => match transfer.event_type {
                TransferEventType::Start => {
                    let bar = ProgressBar::new(0).with_style(bar_style(transfer.direction));
                    bar.set_message(transfer.filename.clone());
                    bars.insert(transfer.transfer_id, bar);
                }
                TransferEventType::Progress => {
                    if let (Some(bar), Some(progress)) = (bars.get(&transfer.transfer_id), transfer.progress) {
                        bar.set_message(progress.filename);
                        bar.set_length(progress.total);
                        bar.set_position(progress.transferred);
                    }
                }
                TransferEventType::Complete => {
                    if let Some(bar) = bars.remove(&transfer.transfer_id) {
                        bar.finish_and_clear();
                    }
                }
                TransferEventType::Error | TransferEventType::Cancelled => {
                    if let Some(bar) = bars.remove(&transfer.transfer_id) {
                        bar.abandon_with_message(transfer.message.unwrap_or_else(|| "cancelled".to_string()));
                    }
                }
            },
            DriveEvent::Notification(notification) => match notification.level {
                NotificationLevel::Success => eprintln!("{}", notification.message),
                // Failed commands are reported once, by main
                NotificationLevel::Error => tracing::debug!("{}", notification.message),
            },
        }
    }
}

async fn download(url: &str, target: &Path) -> anyhow::Result<()> {
    let response = reqwest::get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    tokio::fs::write(target, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!("{} ({})", target.display(), format_bytes(bytes.len() as u64, 1));
    Ok(())
}

async fn run_drive(config: &DriveConfig, command: Commands) -> anyhow::Result<()> {
    let (tx, rx) = unbounded_channel();
    let renderer = tokio::spawn(render_events(rx));

    let provider = config.identity_provider(secrets_from_env())?;
    let session = DriveSession::connect(config, provider.as_ref(), Arc::new(tx)).await?;
    let result = run_command(&session, command).await;

    session.sign_out().await;
    drop(session);
    let _ = renderer.await;
    result
}

async fn run_command(session: &DriveSession, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ls { path } => {
            session.navigate(FolderPath::parse(&path)).await?;
            let listing = session.view().ok_or_else(|| anyhow!("Folder listing unavailable"))?;
            let trail: Vec<String> = session.breadcrumbs().into_iter().map(|c| c.label).collect();
            println!("{}", trail.join(" > "));
            for folder in &listing.folders {
                println!("{:>10}  {:<20}  {}/", "-", "", folder);
            }
            for file in &listing.files {
                let modified = file
                    .last_modified
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{:>10}  {:<20}  {}", format_bytes(file.size, 1), modified, file.name);
            }
            if listing.is_empty() {
                println!("(empty)");
            }
        }
        Commands::Mkdir { path } => {
            let (folder, name) = split_path(&path)?;
            session.navigate(folder).await?;
            session.create_folder(&name).await?;
        }
        Commands::Put { local, to } => {
            let mut files = Vec::with_capacity(local.len());
            for path in &local {
                files.push(UploadFile::from_path(path).await?);
            }
            session.navigate(FolderPath::parse(&to)).await?;
            let report = session.upload(files, None).await?;
            for file in &report.uploaded {
                println!("{} -> {}", file.name, file.key);
            }
            if !report.is_complete() {
                bail!("{} file(s) failed to upload", report.failed.len());
            }
        }
        Commands::Get { remote, local } => {
            let (folder, name) = split_path(&remote)?;
            let entry = locate(session, folder, &name).await?;
            match session.archive_and_download(vec![entry]).await? {
                DownloadOutcome::Link { name, url } => download(&url, &local.join(name)).await?,
                DownloadOutcome::Archive(archive) => {
                    let path = archive.save_to(&local)?;
                    println!("{} ({} files)", path.display(), archive.files);
                }
            }
        }
        Commands::Rm { paths } => {
            for path in paths {
                let (folder, name) = split_path(&path)?;
                let entry = locate(session, folder, &name).await?;
                session.delete_entries(vec![entry]).await?;
            }
        }
        Commands::Zip { folder, names, output } => {
            session.navigate(FolderPath::parse(&folder)).await?;
            let view = session.view().ok_or_else(|| anyhow!("Folder listing unavailable"))?;
            let mut entries = Vec::with_capacity(names.len());
            for name in &names {
                if view.folders.contains(name) {
                    entries.push(EntryId::folder(name.as_str()));
                } else if view.file(name).is_some() {
                    entries.push(EntryId::file(name.as_str()));
                } else {
                    bail!("'{}' not found in {}", name, session.current_path());
                }
            }
            match session.archive_and_download(entries).await? {
                DownloadOutcome::Link { name, url } => download(&url, &output.join(name)).await?,
                DownloadOutcome::Archive(archive) => {
                    let path = archive.save_to(&output)?;
                    println!("{} ({} files, {} skipped)", path.display(), archive.files, archive.skipped.len());
                }
            }
        }
        Commands::Link { path, download } => {
            let (folder, name) = split_path(&path)?;
            let entry = locate(session, folder, &name).await?;
            let mode = if download { LinkMode::Attachment } else { LinkMode::Inline };
            println!("{}", session.resolve_link(&entry, mode).await?);
        }
        Commands::Config { .. } => bail!("config does not need a drive session"),
    }
    Ok(())
}

fn run_config(config_path: &Path, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config_from(config_path);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => println!("{}", config_path.display()),
        ConfigAction::Init { bucket, region, endpoint, path_style, root, access_key_id } => {
            let config = DriveConfig {
                bucket,
                region,
                endpoint,
                path_style,
                identity: IdentityConfig::Static { root, access_key_id, secret_access_key: None },
                ..Default::default()
            };
            s3drive::config::validate_config(&config)?;
            save_config_to(&config, config_path)?;
            println!("Configuration written to {}", config_path.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(get_config_path);
    let result = match cli.command {
        Commands::Config { action } => run_config(&config_path, action),
        command => run_drive(&load_config_from(&config_path), command).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
