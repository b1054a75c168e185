//! Browser service binary: one tab session on stdin/stdout.
//!
//! Reads request lines from stdin and writes response lines to stdout. All
//! tracing goes to stderr so stdout stays a clean protocol channel.

use clap::{Parser, ValueEnum};
use std::time::Duration;
use vocal::browser::service::run_stdio;
use vocal::browser::webdriver::WebDriverDriver;
use vocal::browser::{MemoryDriver, PageDriver, TabSessionStore, TabSettings};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverKind {
    /// A WebDriver endpoint such as chromedriver.
    Webdriver,
    /// Simulated pages, for tests and dry runs.
    Memory,
}

/// Controlled browser service for vocal.
#[derive(Parser)]
#[command(name = "vocal-browser", version, about)]
struct Args {
    /// Page driver backend.
    #[arg(long, value_enum, default_value = "webdriver")]
    driver: DriverKind,

    /// WebDriver endpoint.
    #[arg(long, default_value = "http://localhost:9515")]
    webdriver_url: String,

    /// Page opened in fresh and reset tabs.
    #[arg(long, default_value = "https://www.google.com")]
    landing_url: String,

    /// Page load wait in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    load_wait_ms: u64,

    /// Element lookup wait in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    element_wait_ms: u64,

    /// Tab title width in tab context replies.
    #[arg(long, default_value_t = 40)]
    title_width: usize,
}

impl Args {
    fn settings(&self) -> TabSettings {
        TabSettings {
            landing_url: self.landing_url.clone(),
            load_wait: Duration::from_millis(self.load_wait_ms),
            element_wait: Duration::from_millis(self.element_wait_ms),
            title_width: self.title_width,
        }
    }
}

async fn serve<D: PageDriver>(driver: D, settings: TabSettings) -> anyhow::Result<()> {
    let store = TabSessionStore::start(driver, settings)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open the landing tab: {e}"))?;
    run_stdio(store)
        .await
        .map_err(|e| anyhow::anyhow!("browser service failed: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vocal=info")),
        )
        .init();

    let args = Args::parse();
    let settings = args.settings();
    tracing::info!(driver = ?args.driver, landing = %settings.landing_url, "vocal-browser starting");

    let result = match args.driver {
        DriverKind::Webdriver => {
            let driver = WebDriverDriver::connect(&args.webdriver_url)
                .await
                .map_err(|e| anyhow::anyhow!("cannot reach WebDriver at {}: {e}", args.webdriver_url))?;
            serve(driver, settings).await
        }
        DriverKind::Memory => serve(MemoryDriver::new(), settings).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "vocal-browser exited with error");
    } else {
        tracing::info!("vocal-browser shut down cleanly");
    }
    result
}
