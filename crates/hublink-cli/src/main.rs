//! HubLink CLI — call a hub or serve paths to it from the terminal.
//!
//! Every command loads `~/.hublink/config.toml` (or `--config`), applies
//! `--endpoint`, and runs a short-lived node on its own Tokio runtime.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use clap::Parser;
use hublink_types::config::load_config;
use hublink_types::HubConfig;
use tracing::{debug, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Subscriber whose filter can be swapped once the config is known.
fn build_subscriber<W>(
    writer: W,
    filter: EnvFilter,
) -> (impl tracing::Subscriber + Send + Sync + 'static, FilterHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer));
    (subscriber, handle)
}

/// Trace to stderr before the config is read.
///
/// Returns a handle for applying the configured level, or `None` when
/// `RUST_LOG` is set and wins.
fn init_tracing_stderr() -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let overridden = from_env.is_some();
    let filter = from_env.unwrap_or_else(|| EnvFilter::new(HubConfig::default().log_level));
    let (subscriber, handle) = build_subscriber(std::io::stderr, filter);
    subscriber.init();
    (!overridden).then_some(handle)
}

fn apply_log_level(handle: &FilterHandle, level: &str) {
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        warn!(error = %e, level, "Failed to apply configured log level");
    }
}

fn resolve_config(cli: &Cli) -> HubConfig {
    let mut config = load_config(cli.config.as_deref());
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    debug!(endpoint = %config.url(), "Resolved hub endpoint");
    config
}

fn main() {
    let cli = Cli::parse();
    let filter = init_tracing_stderr();
    let config = resolve_config(&cli);
    if let Some(handle) = &filter {
        apply_log_level(handle, &config.log_level);
    }

    match cli.command {
        Commands::Call {
            path,
            body,
            connect_timeout,
        } => cmd::call::cmd_call(&config, &path, body.as_deref(), connect_timeout),
        Commands::Serve { no_admin } => cmd::serve::cmd_serve(&config, no_admin),
        Commands::Key => cmd::system::cmd_key(&config),
        Commands::Completion { shell } => cmd::system::cmd_completion(shell),
    }
}
