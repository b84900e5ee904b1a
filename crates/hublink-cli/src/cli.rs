//! Clap CLI definitions for HubLink.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  hublink call status                        Bodiless request
  hublink call echo --body '{\"msg\":\"hi\"}'    Request with a JSON body
  hublink serve                              Serve the demo services
  hublink serve --no-admin                   ...with the admin group off
  hublink key                                Show this node's identity";

/// HubLink — symmetric RPC peer for a local hub.
#[derive(Parser)]
#[command(
    name = "hublink",
    version,
    about = "HubLink peer: call a hub and serve paths over one WebSocket",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Hub WebSocket URL (overrides the config file).
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one request and print the response body.
    Call {
        /// Path to call.
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        /// Give up if no connection is made within this many seconds.
        #[arg(long, default_value_t = 10)]
        connect_timeout: u64,
    },
    /// Serve the demo services until Ctrl-C.
    Serve {
        /// Start with the admin group disabled.
        #[arg(long)]
        no_admin: bool,
    },
    /// Show the node key and a freshly signed auth header.
    Key,
    /// Generate shell completion scripts.
    Completion {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_call_args() {
        let cli = Cli::parse_from([
            "hublink",
            "--endpoint",
            "ws://10.0.0.2:1997",
            "call",
            "echo",
            "--body",
            "{\"msg\":\"hi\"}",
        ]);
        assert_eq!(cli.endpoint.as_deref(), Some("ws://10.0.0.2:1997"));
        match cli.command {
            Commands::Call {
                path,
                body,
                connect_timeout,
            } => {
                assert_eq!(path, "echo");
                assert_eq!(body.as_deref(), Some("{\"msg\":\"hi\"}"));
                assert_eq!(connect_timeout, 10);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["hublink", "serve", "--no-admin", "--config", "/tmp/h.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/h.toml")));
        assert!(matches!(cli.command, Commands::Serve { no_admin: true }));
    }
}
