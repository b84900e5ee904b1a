use crate::cli::Cli;
use crate::ui;
use clap::CommandFactory;
use hublink_types::{Credentials, HubConfig, KeyChain};

pub fn cmd_key(config: &HubConfig) {
    let path = config.auth.key_path();
    let keys = match KeyChain::load_or_create(&path) {
        Ok(keys) => keys,
        Err(e) => {
            ui::error_with_fix(
                &format!("Failed to load key {}: {e}", path.display()),
                "Remove the file to generate a new key",
            );
            std::process::exit(1);
        }
    };

    ui::section("Node identity");
    ui::kv("Key file", &path.display().to_string());
    ui::kv("Public key", &keys.public_key());
    match keys.auth_header() {
        Ok(header) => ui::kv("Header", &header),
        Err(e) => ui::error(&format!("Failed to sign header: {e}")),
    }
    if !config.auth.enabled {
        ui::hint("Set [auth] enabled = true to send this header on connect");
    }
}

pub fn cmd_completion(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "hublink", &mut std::io::stdout());
}
