//! Command implementations.

pub mod call;
pub mod serve;
pub mod system;

use crate::ui;

/// Build the runtime a command runs on, or exit.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}
