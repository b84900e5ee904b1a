use crate::cmd::runtime;
use crate::ui;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use hublink_types::HubConfig;
use hublink_wire::{HubNode, ServiceGroup, ServiceRegistry, StreamEmitter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Output of `time`.
#[derive(Debug, Serialize)]
struct Now {
    #[serde(with = "hublink_wire::date")]
    now: DateTime<Utc>,
}

/// Input of `count`.
#[derive(Debug, Deserialize)]
struct CountInput {
    to: u32,
    #[serde(default)]
    interval_ms: u64,
}

/// Input of `fail`; a custom message replaces the default one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FailInput {
    message: Option<String>,
}

pub(crate) fn demo_registry(admin_enabled: bool) -> ServiceRegistry {
    let mut admin = ServiceGroup::new("admin")
        .unary("admin/ping", |_: ()| async move { Ok("pong") })
        .app(
            "Admin",
            "admin",
            json!([{"type": "text", "id": "title", "value": "Admin"}]),
        );
    if !admin_enabled {
        admin = admin.disabled();
    }

    ServiceRegistry::new()
        .unary("echo", |input: Value| async move { Ok(input) })
        .unary("time", |_: ()| async move { Ok(Now { now: Utc::now() }) })
        .unary("fail", |input: Option<FailInput>| async move {
            let message = input
                .and_then(|i| i.message)
                .unwrap_or_else(|| "bad input".to_string());
            Err::<(), _>(anyhow!(message))
        })
        .stream("count", |input: CountInput, out: StreamEmitter| async move {
            for n in 1..=input.to {
                out.emit(&n)?;
                if input.interval_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(input.interval_ms)).await;
                }
            }
            Ok(())
        })
        .group(admin)
}

pub fn cmd_serve(config: &HubConfig, no_admin: bool) {
    let rt = runtime();
    rt.block_on(async {
        let node = match HubNode::connect(config, demo_registry(!no_admin)) {
            Ok(node) => node,
            Err(e) => {
                ui::error_with_fix(
                    &format!("Failed to start node: {e}"),
                    "Check the [auth] section of your config",
                );
                std::process::exit(1);
            }
        };

        ui::section("Serving");
        ui::kv("Hub", &config.url());
        let capabilities = node.capabilities();
        for service in &capabilities.services {
            ui::kv_dim("Path", &service.path);
        }
        for app in &capabilities.apps {
            ui::kv_dim("App", &format!("{} ({})", app.name, app.path));
        }
        ui::hint("Press Ctrl-C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            ui::error(&format!("Failed to listen for Ctrl-C: {e}"));
        }
        node.shutdown();
        ui::success("Stopped");
    });
}
