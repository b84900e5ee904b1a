use crate::cmd::runtime;
use crate::ui;
use hublink_types::HubConfig;
use hublink_wire::{CancelToken, HubNode, ServiceRegistry, WireError};
use serde_json::Value;
use std::time::Duration;

pub fn cmd_call(config: &HubConfig, path: &str, body: Option<&str>, connect_timeout: u64) {
    let body: Option<Value> = match body.map(serde_json::from_str).transpose() {
        Ok(body) => body,
        Err(e) => {
            ui::error_with_fix(
                &format!("Invalid --body JSON: {e}"),
                "Pass one JSON document, e.g. --body '{\"msg\":\"hi\"}'",
            );
            std::process::exit(1);
        }
    };

    let rt = runtime();
    let result = rt.block_on(call(
        config,
        path,
        body.as_ref(),
        Duration::from_secs(connect_timeout),
    ));

    match result {
        Ok(Value::Null) => {}
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                ui::error(&format!("Failed to render response: {e}"));
                std::process::exit(1);
            }
        },
        Err(WireError::Remote(message)) => {
            ui::error(&format!("{path}: {message}"));
            std::process::exit(2);
        }
        Err(WireError::Cancelled) => {
            ui::error_with_fix(
                &format!("Could not reach hub at {}", config.url()),
                "Check that the hub is running, or pass --endpoint",
            );
            std::process::exit(1);
        }
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    }
}

async fn call(
    config: &HubConfig,
    path: &str,
    body: Option<&Value>,
    connect_timeout: Duration,
) -> Result<Value, WireError> {
    let node = HubNode::connect(config, ServiceRegistry::new())?;

    // Stop waiting for a connection after the timeout. Once the request is
    // written only Ctrl-C ends the wait.
    let cancel = CancelToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(connect_timeout).await;
            cancel.cancel();
        })
    };

    let result = tokio::select! {
        result = node.send_with_cancel(path, body, &cancel) => result,
        _ = tokio::signal::ctrl_c() => {
            ui::hint("Interrupted");
            std::process::exit(130);
        }
    };
    timer.abort();
    node.shutdown();
    result
}
