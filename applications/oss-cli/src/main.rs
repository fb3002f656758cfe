//! oss - command-line client for the object-storage backend
mod config;

use anyhow::bail;
use clap::{Parser, Subcommand};
use oss_client::{FileSource, FileUpdate, OssClient, UploadPhase, UploadProgress};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "oss")]
#[command(about = "Object-storage command-line client", long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./oss.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend URL, overriding the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Access token from an earlier login
    #[arg(long, global = true, env = "OSS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Username
    #[arg(short, long, global = true, env = "OSS_USERNAME")]
    username: Option<String>,

    /// Password
    #[arg(short, long, global = true, env = "OSS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print an access token for OSS_TOKEN
    Login,
    /// Show the logged-in user
    Whoami,
    /// Upload a file
    Upload {
        /// File to upload
        path: PathBuf,
        /// Description stored with the file
        #[arg(short, long)]
        description: Option<String>,
        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,
    },
    /// List stored files
    List {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Show a file record as JSON
    Get { id: i64 },
    /// Change a file's name, description or tags
    Update {
        id: i64,
        #[arg(long)]
        filename: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        tags: Option<String>,
    },
    /// Print a time-limited download link
    Download { id: i64 },
    /// Delete a file
    Delete { id: i64 },
    /// Show server-side progress of a multipart upload
    Progress { upload_id: String },
    /// Discard a multipart upload
    Abort { upload_id: String },
    /// Check the backend
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oss_cli=info,oss_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut client_config = config::load(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        client_config.base_url = base_url.clone();
    }
    let client = OssClient::new(client_config)?;

    if !matches!(cli.command, Commands::Login) {
        authenticate(&client, &cli).await?;
    }

    match cli.command {
        Commands::Login => {
            login(&client, cli.username.as_deref(), cli.password.as_deref()).await?;
        }
        Commands::Whoami => {
            let user = client.current_user().await?;
            println!("{} (id {})", user.username, user.id);
            if let Some(email) = user.email {
                println!("  email: {}", email);
            }
        }
        Commands::Upload {
            path,
            description,
            tags,
        } => {
            upload(&client, path, description, tags).await?;
        }
        Commands::List { skip, limit } => {
            let files = client.files().list(skip, limit).await?;
            println!("Files:");
            for file in files {
                println!(
                    "  {:>6}  {:>12}  {}  {}",
                    file.id, file.file_size, file.created_at, file.filename
                );
            }
        }
        Commands::Get { id } => {
            let record = client.files().get(id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Update {
            id,
            filename,
            description,
            tags,
        } => {
            let update = FileUpdate {
                filename,
                description,
                tags,
            };
            let record = client.files().update(id, &update).await?;
            println!("Updated {} ({})", record.id, record.filename);
        }
        Commands::Download { id } => {
            let link = client.files().download_url(id).await?;
            println!("{}", link.download_url);
            if let Some(expires_in) = link.expires_in {
                eprintln!("valid for {}s", expires_in);
            }
        }
        Commands::Delete { id } => {
            client.files().delete(id).await?;
            println!("Deleted {}", id);
        }
        Commands::Progress { upload_id } => {
            let progress = client.executor().get_progress(&upload_id).await?;
            println!(
                "{}: {}/{} parts ({:.1}%)",
                progress.upload_id,
                progress.completed_parts,
                progress.total_parts,
                progress.percent()
            );
        }
        Commands::Abort { upload_id } => {
            client.executor().abort(&upload_id).await?;
            println!("Aborted {}", upload_id);
        }
        Commands::Health => {
            let health = client.files().health().await?;
            println!("{}", health.status);
        }
    }

    Ok(())
}

async fn login(
    client: &OssClient,
    username: Option<&str>,
    password: Option<&str>,
) -> anyhow::Result<()> {
    let (Some(username), Some(password)) = (username, password) else {
        bail!("login needs --username and --password (or OSS_USERNAME / OSS_PASSWORD)");
    };

    let response = client.login(username, password).await?;
    tracing::info!(username = %username, "Logged in");
    println!("{}", response.access_token);
    Ok(())
}

/// Start a session from a saved token or from username and password.
/// Without either, requests go out with the configured API key, if any.
async fn authenticate(client: &OssClient, cli: &Cli) -> anyhow::Result<()> {
    if let Some(token) = &cli.token {
        client.restore_token(token.clone());
    } else if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        client.login(username, password).await?;
    }
    Ok(())
}

async fn upload(
    client: &OssClient,
    path: PathBuf,
    description: Option<String>,
    tags: Option<String>,
) -> anyhow::Result<()> {
    let source = FileSource::open(&path).await?;
    let mut metadata = source.metadata();
    if let Some(description) = description {
        metadata = metadata.with_description(description);
    }
    if let Some(tags) = tags {
        metadata = metadata.with_tags(tags);
    }

    tracing::info!(
        file = %path.display(),
        size = metadata.file_size,
        content_type = %metadata.content_type,
        "Uploading"
    );

    let task = client.spawn_upload(Arc::new(source), metadata);
    let mut progress = task.progress();
    let cancel = task.cancellation_token();

    let report = async {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            print_progress(&snapshot);
        }
    };

    tokio::select! {
        () = report => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            tracing::warn!("Interrupted, cancelling upload");
            cancel.cancel();
        }
    }

    let result = task.wait().await;
    eprintln!();
    let record = result?;
    println!("Uploaded {} as {} (id {})", record.filename, record.oss_key, record.id);
    Ok(())
}

fn print_progress(progress: &UploadProgress) {
    let phase = match progress.phase {
        UploadPhase::Planning => "planning",
        UploadPhase::Transferring => "uploading",
        UploadPhase::Finalizing => "finalizing",
        UploadPhase::Completed => "done",
        UploadPhase::Failed => "failed",
        UploadPhase::Aborted => "aborted",
    };

    let mut stderr = std::io::stderr();
    // Progress output is best-effort
    let _ = write!(
        stderr,
        "\r{:<10} {:>6.1}%  {}/{} parts  {}/{} bytes",
        phase,
        progress.percent,
        progress.completed_parts,
        progress.total_parts,
        progress.bytes_sent,
        progress.bytes_total
    );
    let _ = stderr.flush();
}
