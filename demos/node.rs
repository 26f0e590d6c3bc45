//! Single cluster node.
//!
//! Starts one service and keeps it running until interrupted, printing
//! the membership view whenever it changes.
//!
//! ```bash
//! # First node
//! cargo run --example node -- --bind 127.0.0.1:7400
//! # Joining nodes
//! cargo run --example node -- --bind 127.0.0.1:7401 --seed 127.0.0.1:7400
//! ```

use std::sync::Arc;

use conclave::prelude::*;
use serde_json::json;

struct PrintTopology;

impl TopologyChangeListener for PrintTopology {
    fn on_change(&self, event: &TopologyChangeEvent) {
        println!(
            "topology change: coordinator={} changed={}",
            event.is_coordinator(),
            event.coordinator_has_changed()
        );
    }
}

#[tokio::main]
async fn main() -> conclave::error::Result<()> {
    init_logging(LogFormat::from_env()).ok();

    let mut config = RpcConfig::from_env()?;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "--bind" => {
                config.bind_addr = args[i + 1]
                    .parse()
                    .map_err(|e| RpcError::Config(format!("invalid --bind: {e}")))?;
            }
            "--seed" => {
                config.seeds.push(
                    args[i + 1]
                        .parse()
                        .map_err(|e| RpcError::Config(format!("invalid --seed: {e}")))?,
                );
            }
            other => {
                eprintln!("unknown argument {other}");
                eprintln!("usage: node --bind <addr:port> [--seed <addr:port>]...");
                std::process::exit(2);
            }
        }
        i += 2;
    }

    let service = RpcService::new(config)?;
    service.add_topology_listener(Arc::new(PrintTopology));
    service.register_command(Arc::new(FnCommand::new("uptime", {
        let started = std::time::Instant::now();
        move |_args| Ok(json!(started.elapsed().as_secs()))
    })));
    service.start().await?;
    println!("running as {}", service.local_member()?);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))?;
    println!("interrupted, leaving the cluster");
    service.stop().await?;
    Ok(())
}
