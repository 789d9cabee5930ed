//! imgbed: operator command line for the storage gateway core.
//!
//! Reads DATABASE_URL and the other settings from the environment (or .env).

use anyhow::Context;
use clap::{Parser, Subcommand};
use imgbed_cli::{content_type_for, init_tracing, owner_scope, report_error, AppContext};
use imgbed_core::models::{BackendFlag, TaskStatus};
use imgbed_core::settings::{KEY_ACCESS_POLICY, KEY_MAX_UPLOAD_MB, KEY_RETRY_COUNT};
use imgbed_core::{BackendKind, Config, SettingsProvider};
use imgbed_services::UploadRequest;
use imgbed_storage::{ByteSource, ThirdPartyUploader, UploaderConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use uuid::Uuid;

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "imgbed", about = "Image storage gateway CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file on behalf of a user
    Upload {
        /// Path to the image
        file: PathBuf,
        /// Owning user id
        #[arg(long)]
        owner: i64,
        /// Restrict the upload to these backend ids
        #[arg(long = "backend")]
        backends: Vec<i64>,
    },
    /// Pick a healthy location for an image
    Resolve {
        /// Image public id
        id: Uuid,
    },
    /// Show one image with its locations
    Get {
        id: Uuid,
        /// Act as this user instead of admin
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Delete an image
    Delete {
        id: Uuid,
        #[arg(long)]
        owner: Option<i64>,
    },
    /// List images, newest first
    List {
        #[arg(long)]
        owner: Option<i64>,
        /// Case-insensitive filename filter
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },
    /// Delete several images in the background and wait for the task
    BatchDelete {
        ids: Vec<Uuid>,
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Copy images from their local copy to a backend and wait for the task
    Backfill {
        /// Target backend id
        #[arg(long)]
        backend: i64,
        ids: Vec<Uuid>,
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Print a random eligible image id
    Random,
    /// Flip an image's random-pool flag
    ToggleRandom {
        id: Uuid,
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Backend administration
    Backends {
        #[command(subcommand)]
        sub: BackendCommands,
    },
    /// Enable or disable a single storage location
    SetLocationActive { location_id: i64, active: bool },
    /// Runtime settings
    Settings {
        #[command(subcommand)]
        sub: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum BackendCommands {
    /// List configured backends
    List,
    /// Rebuild the registry and report how many backends loaded
    Refresh,
    /// Toggle accepts_uploads or serves_redirects
    SetFlag {
        id: i64,
        /// accepts_uploads | serves_redirects
        flag: BackendFlag,
        value: bool,
    },
    /// Delete an unreferenced backend
    Delete { id: i64 },
    /// Verify a third-party host's API token
    CheckToken { id: i64 },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the effective settings
    Show,
    /// Persist one setting
    Set { key: String, value: String },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn wait_for_task(ctx: &AppContext, task_id: Uuid) -> anyhow::Result<()> {
    loop {
        let task = ctx
            .batch
            .tasks()
            .get(task_id)
            .await
            .context("Task disappeared")?;
        if task.is_finished() {
            print_json(&task)?;
            if task.status == TaskStatus::Failed {
                anyhow::bail!("Task {} failed", task_id);
            }
            return Ok(());
        }
        tracing::info!(task_id = %task_id, progress = task.progress, total = task.total, "Waiting for task");
        tokio::time::sleep(TASK_POLL_INTERVAL).await;
    }
}

async fn run_backends(ctx: &AppContext, sub: BackendCommands) -> anyhow::Result<()> {
    match sub {
        BackendCommands::List => print_json(&ctx.backends.list_backends().await?)?,
        BackendCommands::Refresh => {
            let count = ctx.registry.refresh().await?;
            print_json(&serde_json::json!({ "registered": count }))?;
        }
        BackendCommands::SetFlag { id, flag, value } => {
            print_json(&ctx.backends.set_backend_flag(id, flag, value).await?)?;
        }
        BackendCommands::Delete { id } => {
            ctx.backends.delete_backend(id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        BackendCommands::CheckToken { id } => {
            let backend = ctx.backends.get_backend(id).await?;
            if backend.kind != BackendKind::ThirdPartyHost {
                anyhow::bail!("Backend {} is {}, not a third-party host", id, backend.kind);
            }
            let UploaderConfig::ThirdParty(config) =
                UploaderConfig::parse(backend.kind, &backend.config)?
            else {
                anyhow::bail!("Backend {} has no third-party configuration", id);
            };
            ThirdPartyUploader::new(&config, ctx.config.upstream_timeout())?
                .check_token()
                .await?;
            print_json(&serde_json::json!({ "backend_id": id, "token": "valid" }))?;
        }
    }
    Ok(())
}

async fn run_settings(ctx: &AppContext, sub: SettingsCommands) -> anyhow::Result<()> {
    match sub {
        SettingsCommands::Show => {}
        SettingsCommands::Set { key, value } => {
            if ![KEY_RETRY_COUNT, KEY_ACCESS_POLICY, KEY_MAX_UPLOAD_MB].contains(&key.as_str()) {
                anyhow::bail!("Unknown setting {}", key);
            }
            ctx.settings_store.save_setting(&key, &value).await?;
            ctx.reload_settings().await?;
        }
    }
    let current = ctx.settings.snapshot().await;
    print_json(&current)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let ctx = AppContext::build(config).await?;

    match cli.command {
        Commands::Upload {
            file,
            owner,
            backends,
        } => {
            let original_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("Upload path has no file name")?;
            let request = UploadRequest {
                content_type: content_type_for(&file),
                source: ByteSource::File(file),
                original_name,
            };
            let stored = ctx
                .images
                .upload_image(request, owner, Some(backends.as_slice()))
                .await?;
            print_json(&stored)?;
        }
        Commands::Resolve { id } => {
            let location = ctx.resolver.get_healthy_location(id).await?;
            print_json(&location)?;
        }
        Commands::Get { id, owner } => {
            print_json(&ctx.images.get_image(id, owner_scope(owner)).await?)?;
        }
        Commands::Delete { id, owner } => {
            ctx.images.delete_image(id, owner_scope(owner)).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        Commands::List {
            owner,
            keyword,
            page,
            page_size,
        } => {
            let page = ctx
                .images
                .list_images(owner_scope(owner), keyword.as_deref(), page, page_size)
                .await?;
            print_json(&page)?;
        }
        Commands::BatchDelete { ids, owner } => {
            let task_id = ctx.batch.batch_delete(ids, owner_scope(owner)).await?;
            wait_for_task(&ctx, task_id).await?;
        }
        Commands::Backfill {
            backend,
            ids,
            owner,
        } => {
            let task_id = ctx
                .batch
                .batch_backfill_to_backend(ids, backend, owner_scope(owner))
                .await?;
            wait_for_task(&ctx, task_id).await?;
        }
        Commands::Random => {
            let id = ctx.random_cache.random_image_id().await?;
            print_json(&serde_json::json!({ "public_id": id }))?;
        }
        Commands::ToggleRandom { id, owner } => {
            let image = ctx
                .images
                .toggle_random_eligibility(id, owner_scope(owner))
                .await?;
            print_json(&image)?;
        }
        Commands::Backends { sub } => run_backends(&ctx, sub).await?,
        Commands::SetLocationActive {
            location_id,
            active,
        } => {
            ctx.images.set_location_active(location_id, active).await?;
            print_json(&serde_json::json!({ "location_id": location_id, "active": active }))?;
        }
        Commands::Settings { sub } => run_settings(&ctx, sub).await?,
    }

    Ok(())
}
