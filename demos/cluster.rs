//! Three-node in-process cluster demo.
//!
//! Starts three services on loopback, broadcasts a command to all
//! members, runs one on the coordinator only, then tears the cluster
//! down.
//!
//! Run with: `cargo run --example cluster`

use std::sync::Arc;

use conclave::prelude::*;
use serde_json::json;

fn register_demo_commands(service: &RpcService, name: &'static str) {
    service.register_command(Arc::new(FnCommand::new("whoami", move |_args| {
        Ok(json!(name))
    })));
    service
        .register_call("greet", CallSpec::variadic(1), move |args| {
            let greeting = args[0].as_str().unwrap_or("hello").to_string();
            let audience = args[1]
                .as_array()
                .map(|a| a.len())
                .unwrap_or_default();
            Ok(json!(format!("{greeting} from {name} to {audience} guests")))
        })
        .expect("valid adapter");
}

#[tokio::main]
async fn main() -> conclave::error::Result<()> {
    init_logging(LogFormat::from_env()).ok();

    let founder = RpcService::new(RpcConfig {
        cluster_name: "demo".to_string(),
        ..RpcConfig::default()
    })?;
    register_demo_commands(&founder, "founder");
    founder.start().await?;
    let seed = founder.local_member()?.addr;

    let make_joiner = |name: &'static str| {
        let config = RpcConfig {
            cluster_name: "demo".to_string(),
            seeds: vec![seed],
            ..RpcConfig::default()
        };
        (name, config)
    };

    let mut joiners = Vec::new();
    for (name, config) in [make_joiner("second"), make_joiner("third")] {
        let service = RpcService::new(config)?;
        register_demo_commands(&service, name);
        service.start().await?;
        joiners.push(service);
    }

    println!("members: {:?}", founder.view_members()?);

    let whoami = founder.registered("whoami").expect("registered above");
    let outcomes = founder
        .execute_on_all(&*whoami, TimeoutSpec::Sync, vec![])
        .await?;
    for (member, outcome) in founder.view_members()?.iter().zip(&outcomes) {
        println!("{member}: {outcome:?}");
    }

    let greet = joiners[0].registered("greet").expect("registered above");
    let value = joiners[0]
        .execute_on_coordinator(
            &*greet,
            TimeoutSpec::Sync,
            vec![json!("salut"), json!("a"), json!("b")],
        )
        .await?;
    println!("coordinator says: {value}");

    for service in joiners.iter().rev() {
        service.stop().await?;
    }
    founder.stop().await?;
    Ok(())
}
