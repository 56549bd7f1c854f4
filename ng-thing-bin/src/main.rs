mod logger;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use logger::Logger;
use ng_thing_mqtt::MqttTransport;
use ng_thing_sdk::{
    Binder, DevicePath, OpResult, OperationReply, OperationRequest, ThingOp, ThingOpConfig,
    Tokened,
};
use serde_json::{json, Value};
use settings::AgentSettings;
use std::{
    env::current_dir,
    path::PathBuf,
    sync::{Arc, Weak},
};
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE_NAME: &str = "thing.toml";

/// Device agent speaking the thing operation protocol over MQTT.
///
/// Connects as one device, answers service invocations published to
/// `/sys/{product}/{thing}/thing/service/+` and fetches its remote configuration once.
#[derive(Parser)]
#[command(name = "ng-thing")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "NG Thing device agent", long_about = None)]
struct Cli {
    /// Config file path, defaults to 'thing.toml' in the working directory
    #[arg(short, long, env = "NG_THING_CONFIG")]
    config: Option<PathBuf>,

    /// Product identifier of this device
    #[arg(long, env = "NG_THING_PRODUCT")]
    product: String,

    /// Thing identifier of this device
    #[arg(long, env = "NG_THING_THING")]
    thing: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => current_dir()
            .context("Failed to get current directory")?
            .join(DEFAULT_CONFIG_FILE_NAME),
    };

    let settings = AgentSettings::load(&config_path)?;
    let mut logger = Logger::new(Logger::parse_level(&settings.log.level));
    logger.initialize(&settings.log.dir)?;

    let config_file = config_path.to_string_lossy().into_owned();
    let op_config = ThingOpConfig::load(Some(config_file.as_str()))?;
    let path = DevicePath::new(cli.product, cli.thing);
    info!(
        device = %path,
        urn = %path.urn(),
        broker = %format!("{}:{}", settings.mqtt.host, settings.mqtt.port),
        "Starting thing agent"
    );

    let transport = Arc::new(MqttTransport::new(settings.mqtt.clone()));
    let thing = Arc::new(ThingOp::new(path.clone(), transport, op_config));
    thing.connect().await?;

    let services = serve_services(&thing).await?;
    match fetch_config(&thing).await {
        Ok(config) => info!(device = %path, config = %config, "Remote configuration received"),
        Err(e) => warn!(device = %path, error = %e, "Remote configuration unavailable"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!(device = %path, "Shutdown signal received");

    let stats = services.statistics();
    info!(
        total = stats.total,
        success = stats.success,
        failure = stats.failure,
        "Service invocation statistics"
    );
    services.unbind().await;
    thing.destroy().await;
    Ok(())
}

/// Answer `thing.service.*` invocations. Replies go to `{request topic}_reply`.
async fn serve_services(thing: &Arc<ThingOp>) -> OpResult<Binder> {
    let expression = thing.path().sys_topic("thing/service/+");
    let weak = Arc::downgrade(thing);
    thing
        .consume_requests::<Value, _>(expression, move |topic, request| {
            info!(topic = %topic, token = %request.token, method = %request.method, "Service invoked");
            if !request.expects_reply() {
                return Ok(());
            }
            let reply = handle_service(&request);
            spawn_reply(weak.clone(), format!("{topic}_reply"), reply);
            Ok(())
        })
        .await
}

fn handle_service(request: &OperationRequest<Value>) -> OperationReply<Value> {
    match request.method.as_str() {
        "thing.service.ping" => {
            OperationReply::success(request.token.clone(), json!({"pong": true}))
        }
        "thing.service.echo" => {
            OperationReply::success(request.token.clone(), request.params.clone())
        }
        other => OperationReply::failure(
            request.token.clone(),
            404,
            format!("unsupported service '{other}'"),
            Value::Null,
        ),
    }
}

fn spawn_reply(thing: Weak<ThingOp>, topic: String, reply: OperationReply<Value>) {
    tokio::spawn(async move {
        let Some(thing) = thing.upgrade() else {
            return;
        };
        if let Err(e) = thing.post(&topic, reply).await {
            warn!(topic = %topic, error = %e, "Failed to reply to service invocation");
        }
    });
}

/// One `thing.config.get` round trip.
async fn fetch_config(thing: &ThingOp) -> OpResult<Value> {
    let caller = thing
        .caller::<Value, Value>(thing.path().sys_topic("thing/config/get_reply"), None)
        .await?;
    let request = thing.request("thing.config.get", json!({}));
    let outcome = caller
        .call(&thing.path().sys_topic("thing/config/get"), request)
        .await;
    caller.unbind().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_replies() {
        let ping = OperationRequest::new("7", "thing.service.ping", json!({}));
        let reply = handle_service(&ping);
        assert!(reply.is_ok());
        assert_eq!(reply.token, "7");
        assert_eq!(reply.data, json!({"pong": true}));

        let echo = OperationRequest::new("8", "thing.service.echo", json!({"a": 1}));
        assert_eq!(handle_service(&echo).data, json!({"a": 1}));

        let unknown = handle_service(&OperationRequest::new("9", "thing.service.reboot", json!({})));
        assert_eq!(unknown.code, 404);
        assert!(unknown.desc.contains("thing.service.reboot"));
    }
}
