//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{ConverterSpec, FabricBlueprint, FilterSpec, Params};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    server: ServerInfo,
    sinks: Vec<SinkInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notify: Vec<NotifyInfo>,
    routes: Vec<TopicInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<ClientInfo>,
}

#[derive(Serialize)]
struct ServerInfo {
    listen: String,
    router_threads: usize,
    queue_capacity: usize,
    enqueue_timeout_ms: u64,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "Params::is_empty")]
    params: Params,
}

#[derive(Serialize)]
struct NotifyInfo {
    name: String,
    notify_type: String,
    #[serde(skip_serializing_if = "Params::is_empty")]
    params: Params,
}

#[derive(Serialize)]
struct TopicInfo {
    topic: String,
    routes: Vec<RouteInfo>,
}

#[derive(Serialize)]
struct RouteInfo {
    sink: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    converter: Option<String>,
}

#[derive(Serialize)]
struct ClientInfo {
    load_balancer: String,
    mode: String,
    endpoints: Vec<String>,
    retry_count: u32,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &FabricBlueprint, args: &InfoArgs) -> ConfigInfo {
    let params = |p: &Params| if args.sinks { p.clone() } else { Params::new() };

    let sinks = blueprint
        .sinks
        .iter()
        .map(|(name, sink)| SinkInfo {
            name: name.clone(),
            sink_type: sink.sink_type.clone(),
            queue_capacity: sink.queue_capacity,
            params: params(&sink.params),
        })
        .collect();

    let notify = blueprint
        .notify
        .iter()
        .map(|(name, channel)| NotifyInfo {
            name: name.clone(),
            notify_type: channel.notify_type.clone(),
            params: params(&channel.params),
        })
        .collect();

    let routes = blueprint
        .routes
        .iter()
        .map(|(topic, info)| TopicInfo {
            topic: topic.clone(),
            routes: info
                .routes
                .iter()
                .map(|route| RouteInfo {
                    sink: route.sink.clone(),
                    filter: args
                        .routes
                        .then(|| route.filter.as_ref().map(describe_filter))
                        .flatten(),
                    converter: args
                        .routes
                        .then(|| route.effective_converter().map(describe_converter))
                        .flatten(),
                })
                .collect(),
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        server: ServerInfo {
            listen: blueprint.server.listen.clone(),
            router_threads: blueprint.router.threads,
            queue_capacity: blueprint.router.queue_capacity,
            enqueue_timeout_ms: blueprint.router.enqueue_timeout_ms,
        },
        sinks,
        notify,
        routes,
        client: blueprint.client.as_ref().map(|client| ClientInfo {
            load_balancer: format!("{:?}", client.load_balancer_type),
            mode: format!("{:?}", client.client_mode),
            endpoints: client.server_endpoints.clone(),
            retry_count: client.retry_count,
        }),
    }
}

/// `type(key=value, ...)`
fn describe(kind: &str, params: &Params) -> String {
    if params.is_empty() {
        return kind.to_string();
    }
    let args: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}({})", kind, args.join(", "))
}

fn describe_filter(filter: &FilterSpec) -> String {
    describe(&filter.filter_type, &filter.params)
}

fn describe_converter(converter: &ConverterSpec) -> String {
    describe(&converter.converter_type, &converter.params)
}

fn branch(is_last: bool) -> (&'static str, &'static str) {
    if is_last {
        ("└─", "   ")
    } else {
        ("├─", "│  ")
    }
}

fn print_config_info(blueprint: &FabricBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Event Fabric Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📍 Server");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Listen: {}", blueprint.server.listen);
    println!(
        "   ├─ Router: {} threads, queue {}",
        blueprint.router.threads, blueprint.router.queue_capacity
    );
    println!(
        "   └─ Enqueue timeout: {} ms",
        blueprint.router.enqueue_timeout_ms
    );

    println!("\n📤 Sinks ({})", blueprint.sinks.len());
    for (i, (name, sink)) in blueprint.sinks.iter().enumerate() {
        let (prefix, child) = branch(i == blueprint.sinks.len() - 1);
        println!("   {} {} ({})", prefix, name, sink.sink_type);
        if args.sinks {
            for (j, (key, value)) in sink.params.iter().enumerate() {
                let (param_prefix, _) = branch(j == sink.params.len() - 1);
                println!("   {}  {} {} = {}", child, param_prefix, key, value);
            }
        }
    }

    if !blueprint.notify.is_empty() {
        println!("\n🔔 Notify ({})", blueprint.notify.len());
        for (i, (name, channel)) in blueprint.notify.iter().enumerate() {
            let (prefix, _) = branch(i == blueprint.notify.len() - 1);
            let shown = if args.sinks {
                describe(&channel.notify_type, &channel.params)
            } else {
                channel.notify_type.clone()
            };
            println!("   {} {} ({})", prefix, name, shown);
        }
    }

    println!("\n🔀 Routes ({} topics)", blueprint.routes.len());
    for (i, (topic, info)) in blueprint.routes.iter().enumerate() {
        let (prefix, child) = branch(i == blueprint.routes.len() - 1);
        println!("   {} {}", prefix, topic);
        for (j, route) in info.routes.iter().enumerate() {
            let (route_prefix, _) = branch(j == info.routes.len() - 1);
            let mut line = format!("-> {}", route.sink);
            if args.routes {
                if let Some(filter) = &route.filter {
                    line.push_str(&format!(" [filter: {}]", describe_filter(filter)));
                }
                if let Some(converter) = route.effective_converter() {
                    line.push_str(&format!(" [converter: {}]", describe_converter(converter)));
                }
            }
            println!("   {}  {} {}", child, route_prefix, line);
        }
    }

    if let Some(client) = &blueprint.client {
        println!("\n📡 Client");
        println!("   ├─ Load balancer: {:?}", client.load_balancer_type);
        println!("   ├─ Mode: {:?}", client.client_mode);
        println!("   └─ Endpoints: {}", client.server_endpoints.join(", "));
    }

    println!();
}
