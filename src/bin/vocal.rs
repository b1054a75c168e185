//! CLI binary for vocal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vocal::browser::{BrowserPort, BrowserSupervisor, LocalBrowser, MemoryDriver, TabSettings};
use vocal::desktop::{AppLauncher, DryRunLauncher, SystemLauncher};
use vocal::reasoning;
use vocal::speech::{CommandStt, NoStt, SpeechToText};
use vocal::{ActionRouter, Assistant, EmailDraftSession, Outcome, VocalConfig, VocalServer};

/// Vocal: voice-driven desktop automation.
#[derive(Parser)]
#[command(name = "vocal", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulate the browser and the desktop instead of driving them.
    /// Without an API key, typed text is used as the decision.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and listen for the wake phrase.
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Handle one typed utterance and print the reply.
    Text {
        /// What you would have said.
        #[arg(required = true)]
        utterance: Vec<String>,
    },

    /// Read utterances from stdin, one per line.
    Repl,

    /// Write the default configuration file.
    InitConfig {
        /// Destination; defaults to the standard config path.
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vocal=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(Command::InitConfig { path }) = &cli.command {
        let path = path.clone().unwrap_or_else(VocalConfig::default_config_path);
        VocalConfig::default().save_to_file(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut config = VocalConfig::load_or_default(cli.config.as_deref())?;
    let assistant = Arc::new(build_assistant(&config, cli.dry_run)?);

    let result = match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(Arc::clone(&assistant), &config).await
        }
        Command::Text { utterance } => {
            let outcome = assistant.handle_text(&utterance.join(" ")).await;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Repl => repl(&assistant).await,
        Command::InitConfig { .. } => Ok(()),
    };

    assistant.shutdown().await;
    result
}

fn build_assistant(config: &VocalConfig, dry_run: bool) -> anyhow::Result<Assistant> {
    let (browser, launcher): (Box<dyn BrowserPort>, Arc<dyn AppLauncher>) = if dry_run {
        info!("dry run: simulated browser and desktop");
        let settings = TabSettings::from(&config.browser);
        (
            Box::new(LocalBrowser::new(settings, MemoryDriver::new)),
            Arc::new(DryRunLauncher::new()),
        )
    } else {
        (
            Box::new(BrowserSupervisor::new(config.browser.clone())),
            Arc::new(SystemLauncher::new(&config.apps)),
        )
    };

    let reasoning = reasoning::from_config(&config.reasoning, dry_run)
        .map_err(|e| anyhow::anyhow!("reasoning service not configured: {e}"))?;

    let stt: Arc<dyn SpeechToText> = match &config.listening.stt_command {
        Some(program) => Arc::new(CommandStt::new(program, config.listening.stt_args.clone())),
        None => Arc::new(NoStt),
    };

    let router = ActionRouter::new(browser, launcher, EmailDraftSession::new(config.email.clone()));
    Ok(Assistant::new(
        router,
        reasoning,
        stt,
        &config.listening,
    ))
}

async fn serve(assistant: Arc<Assistant>, config: &VocalConfig) -> anyhow::Result<()> {
    let server = VocalServer::start(Arc::clone(&assistant), &config.server).await?;
    println!("vocal v{} on http://{}", env!("CARGO_PKG_VERSION"), server.addr());

    let cancel = CancellationToken::new();
    let passive = if config.listening.stt_command.is_some() {
        let assistant = Arc::clone(&assistant);
        let token = cancel.clone();
        Some(tokio::spawn(async move { assistant.run_passive_loop(token).await }))
    } else {
        info!("no transcription program configured; wake phrase listening disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    if let Some(task) = passive {
        let _ = task.await;
    }
    server.shutdown();
    Ok(())
}

async fn repl(assistant: &Assistant) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }
        print_outcome(&assistant.handle_text(line).await);
    }
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    match outcome.reply.code {
        Some(code) => println!("[{code}] {}", outcome.reply.text),
        None => println!("{}", outcome.reply.text),
    }
}
