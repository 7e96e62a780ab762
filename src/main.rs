//! `stegokey` operator CLI.
//!
//! - `stegokey serve` - run the HTTP gateway
//! - `stegokey issue` - issue an image offline with an explicit context
//! - `stegokey verify` - check an image offline
//! - `stegokey inspect` - dump the record embedded in an image
//! - `stegokey prune` - drop expired registry entries and sessions

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use stegokey::auth::SessionStore;
use stegokey::context::is_local_address;
use stegokey::stego::carrier;
use stegokey::token::record::LOCAL;
use stegokey::token::verifier::read_record;
use stegokey::token::AuthRecord;
use stegokey::{Config, RequestContext, SqliteRegistry, TokenIssuer, TokenVerifier, VerifyError};

#[derive(Parser)]
#[command(name = "stegokey")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/stegokey/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway.
    Serve,

    /// Issue (or re-issue) an authentication image for an identity.
    ///
    /// The context is taken from the flags. Unset city and country are
    /// "Local" for a loopback --ip, otherwise "Unknown"; unset OS and browser
    /// are "Unknown".
    Issue {
        #[arg(long)]
        email: String,
        #[command(flatten)]
        context: ContextArgs,
        /// Also write the PNG to this path.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip the configured delivery channel.
        #[arg(long)]
        no_deliver: bool,
    },

    /// Verify an image against the registry. Exits non-zero on rejection.
    Verify {
        #[arg(long)]
        image: PathBuf,
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Print the record embedded in an image as JSON.
    Inspect {
        #[arg(long)]
        image: PathBuf,
    },

    /// Remove registry entries past the retention window and expired sessions.
    Prune,
}

#[derive(Args)]
struct ContextArgs {
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    os: Option<String>,
    #[arg(long)]
    browser: Option<String>,
}

impl ContextArgs {
    /// Mirrors what the gateway would resolve for the same address, so an
    /// image issued here can log in from that address.
    fn into_context(self) -> RequestContext {
        let mut context = RequestContext::unknown(self.ip);
        if is_local_address(&context.client_address) {
            context.city = LOCAL.into();
            context.country = LOCAL.into();
        }
        if let Some(city) = self.city {
            context.city = city;
        }
        if let Some(country) = self.country {
            context.country = country;
        }
        if let Some(os) = self.os {
            context.os_name = os;
        }
        if let Some(browser) = self.browser {
            context.browser_name = browser;
        }
        context
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // Logs go to stderr so stdout stays clean for JSON output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start tokio runtime")?;
            runtime.block_on(stegokey::gateway::run_gateway(config))?;
        }
        Commands::Issue {
            email,
            context,
            out,
            no_deliver,
        } => issue(&config, &email, context.into_context(), out.as_deref(), no_deliver)?,
        Commands::Verify { image, context } => {
            return verify(&config, &image, &context.into_context());
        }
        Commands::Inspect { image } => {
            let record = inspect(&config, &image)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Prune => {
            let (removed, expired_sessions) = prune(&config)?;
            println!("Removed {removed} registry entries and {expired_sessions} sessions");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn open_registry(config: &Config) -> Result<Arc<SqliteRegistry>> {
    let path = &config.storage.database_path;
    let registry = SqliteRegistry::open(path)
        .with_context(|| format!("Failed to open registry {}", path.display()))?;
    Ok(Arc::new(registry))
}

fn issue(
    config: &Config,
    email: &str,
    context: RequestContext,
    out: Option<&Path>,
    no_deliver: bool,
) -> Result<()> {
    // Resolve delivery first so a misconfigured mailer fails before the
    // registry is touched.
    let delivery = if no_deliver {
        None
    } else {
        Some(config.build_delivery()?)
    };

    let issuer = TokenIssuer::new(open_registry(config)?, config.token.carrier());
    let issued = issuer.issue(email, &context)?;

    if let Some(dir) = &config.storage.image_dir {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(&issued.image_reference), &issued.png)
            .context("Failed to archive image")?;
    }
    if let Some(path) = out {
        std::fs::write(path, &issued.png)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    if let Some(delivery) = delivery {
        delivery
            .deliver(&issued)
            .with_context(|| format!("{} delivery failed; the image is issued", delivery.name()))?;
        println!("Delivered via {}", delivery.name());
    }

    println!(
        "Issued {} for {} at {}",
        issued.image_reference,
        issued.identity,
        issued.issued_at.to_rfc3339()
    );
    Ok(())
}

fn verify(config: &Config, image: &Path, context: &RequestContext) -> Result<ExitCode> {
    let bytes =
        std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;
    let verifier = TokenVerifier::new(open_registry(config)?)
        .with_retention(config.token.retention())
        .with_max_dimension(config.token.max_upload_dimension);

    match verifier.verify(&bytes, context) {
        Ok(accepted) => {
            println!("accepted: {}", accepted.identity);
            Ok(ExitCode::SUCCESS)
        }
        Err(VerifyError::Rejected(rejection)) => {
            println!("rejected ({}): {rejection}", rejection.kind());
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}

fn inspect(config: &Config, image: &Path) -> Result<AuthRecord> {
    let bytes =
        std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;
    let pixels = carrier::decode(&bytes, config.token.max_upload_dimension)?;
    Ok(read_record(&pixels)?)
}

/// Returns (registry entries removed, sessions removed).
fn prune(config: &Config) -> Result<(u64, u64)> {
    let registry = open_registry(config)?;
    let cutoff = Utc::now() - config.token.retention();
    let removed = registry.prune_expired(cutoff)?;

    let sessions = SessionStore::new(&config.storage.database_path, Some(config.session.ttl_secs))?;
    let expired_sessions = sessions.cleanup_expired_sessions()?;

    tracing::info!(removed, expired_sessions, "Pruned registry");
    Ok((removed, expired_sessions))
}
