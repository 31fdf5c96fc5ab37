use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use tokio::sync::mpsc;

use crate::api::{HttpStegoApi, StegoApi};
use crate::app::{spawn_stdin_reader, AppContext, AppOrchestrator, HELP};
use crate::config::{Config, Overrides};
use crate::notifier::TerminalView;
use crate::state::{Mode, Outcome};
use crate::watch::watch_drop_dir;

/// Hide text in images, or reveal it, through a remote steganography service.
#[derive(Parser, Debug)]
#[command(name = "stegodrop", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Base URL of the service (overrides STEGO_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Use the service running on this machine
    #[arg(long, global = true)]
    pub local: bool,

    /// Largest image accepted, in MiB
    #[arg(long, global = true)]
    pub max_size_mib: Option<u64>,

    #[arg(long, global = true)]
    pub encode_path: Option<String>,

    #[arg(long, global = true)]
    pub decode_path: Option<String>,

    /// Multipart field name for the message (`message` or `text`)
    #[arg(long, global = true)]
    pub message_field: Option<String>,

    /// Request timeout in seconds, 0 to wait forever
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Value for the X-Requested-With header
    #[arg(long, global = true)]
    pub requested_with: Option<String>,

    /// Where encoded images are saved
    #[arg(short, long, global = true)]
    pub output_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl From<&GlobalArgs> for Overrides {
    fn from(args: &GlobalArgs) -> Self {
        Overrides {
            api_url: args.api_url.clone(),
            local: args.local,
            max_size_mib: args.max_size_mib,
            encode_path: args.encode_path.clone(),
            decode_path: args.decode_path.clone(),
            message_field: args.message_field.clone(),
            timeout_secs: args.timeout_secs,
            requested_with: args.requested_with.clone(),
            output_dir: args.output_dir.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hide a message in an image and save the result
    Encode {
        /// PNG, JPEG or BMP image
        #[arg(short, long)]
        image: PathBuf,

        #[arg(short, long)]
        message: String,
    },

    /// Reveal the message hidden in an image
    Decode {
        #[arg(short, long)]
        image: PathBuf,
    },

    /// Check that the service is up
    Health,

    /// Interactive session reading commands from stdin
    Session,

    /// Watch a drop folder (`<dir>/encode`, `<dir>/decode`) alongside a session
    Watch {
        #[arg(default_value = "drop")]
        dir: PathBuf,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?.apply_overrides(Overrides::from(&cli.global))?;
    info!("Using service at {}", config.api_url);
    let api: Arc<dyn StegoApi> = Arc::new(HttpStegoApi::new(&config)?);

    let ctx = Arc::new(AppContext::new(config, api, Arc::new(TerminalView)));

    match cli.command {
        Commands::Health => health(ctx.api.as_ref()).await,
        Commands::Encode { image, message } => {
            single(&ctx, Mode::Encode, image, Some(message)).await
        }
        Commands::Decode { image } => single(&ctx, Mode::Decode, image, None).await,
        Commands::Session => session(ctx, None).await,
        Commands::Watch { dir } => session(ctx, Some(dir)).await,
    }
}

async fn health(api: &dyn StegoApi) -> Result<()> {
    let status = api.health().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("status: {}", status.status);
    if let Some(env) = status.environment {
        println!("environment: {env}");
    }
    if let Some(memory) = status.memory_usage_mb {
        println!("memory (MiB): {memory}");
    }
    Ok(())
}

async fn single(
    ctx: &AppContext,
    mode: Mode,
    image: PathBuf,
    message: Option<String>,
) -> Result<()> {
    let controller = ctx.controller(mode);
    ctx.offer_path(mode, image.clone()).await;
    if let Some(message) = message {
        controller.set_message(message);
    }

    match controller.submit().await {
        Outcome::Rejected(_) if controller.selection().is_some() => {
            bail!("the message to hide must not be empty")
        }
        Outcome::Rejected(_) => bail!("{} was not accepted", image.display()),
        Outcome::Failed(message) => bail!(message),
        Outcome::Saved(_) | Outcome::Revealed(_) | Outcome::NothingHidden => Ok(()),
    }
}

async fn session(ctx: Arc<AppContext>, drop_dir: Option<PathBuf>) -> Result<()> {
    let (tx, rx) = mpsc::channel(32);

    let _watcher = match drop_dir {
        Some(dir) => Some(watch_drop_dir(&dir, tx.clone())?),
        None => None,
    };
    println!("{HELP}");
    spawn_stdin_reader(tx).context("Failed to start the stdin reader")?;

    AppOrchestrator::new(ctx).run(rx).await
}
