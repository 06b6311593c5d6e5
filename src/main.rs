use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use nimbus_client::{MemoryStatusStore, MqttStatusStore, MqttStoreOptions, ShadeStatus};
use nimbus_shade::logging::{
    LogConfig, LogGuard, RotationPeriod, setup_console_logging, setup_file_logging,
};
use nimbus_shade::settings::Settings;
use nimbus_shade::shade::ShadeController;
use nimbus_shade::web::metrics::init_metrics;
use nimbus_shade::web::{WebConfig, start_web_server};

#[derive(Parser, Debug)]
pub struct Params {
    /// Settings file (JSON). Defaults are used when not set.
    #[clap(long)]
    settings: Option<PathBuf>,
    /// MQTT broker host, overrides the settings file
    #[clap(long)]
    host: Option<String>,
    /// MQTT broker port, overrides the settings file
    #[clap(long)]
    port: Option<u16>,
    #[clap(long)]
    user: Option<String>,
    #[clap(long)]
    password: Option<String>,
    /// Root topic of the status record, overrides the settings file
    #[clap(long)]
    root_topic: Option<String>,
    /// Use an in-process store instead of MQTT (demo mode)
    #[clap(long)]
    memory: bool,
    /// Directory for rotating log files (if not set, logs to stdout)
    #[clap(long)]
    log_dir: Option<String>,
    /// Log rotation: minutely, hourly, daily or never
    #[clap(long, default_value = "daily")]
    log_rotation: RotationPeriod,
    /// Web UI port, overrides the settings file
    #[clap(long)]
    web_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();
    let _guard = setup_logging(&params)?;

    let mut settings = Settings::load(params.settings.as_deref())?;
    apply_overrides(&mut settings, &params);
    let config = settings.controller_config();

    let metrics_handle = init_metrics().context("Failed to install metrics recorder")?;

    let controller = if params.memory {
        info!("Using in-memory status store");
        ShadeController::start(MemoryStatusStore::with_status(&ShadeStatus::default()), config)
            .await?
    } else {
        let options = MqttStoreOptions::builder()
            .host(settings.store.host.clone())
            .port(settings.store.port)
            .user(settings.store.user.clone())
            .password(settings.store.password.clone())
            .root_topic(settings.store.root_topic.clone())
            .build()?;
        let store = MqttStatusStore::connect(options).await?;
        ShadeController::start(store, config).await?
    };

    start_web_server(
        WebConfig {
            port: settings.web.port,
            enabled: settings.web.enabled,
        },
        controller.clone(),
        metrics_handle,
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    controller.shutdown().await;

    Ok(())
}

fn apply_overrides(settings: &mut Settings, params: &Params) {
    if let Some(host) = &params.host {
        settings.store.host = host.clone();
    }
    if let Some(port) = params.port {
        settings.store.port = port;
    }
    if params.user.is_some() {
        settings.store.user = params.user.clone();
    }
    if params.password.is_some() {
        settings.store.password = params.password.clone();
    }
    if let Some(root_topic) = &params.root_topic {
        settings.store.root_topic = root_topic.clone();
    }
    if let Some(port) = params.web_port {
        settings.web.port = port;
    }
}

fn setup_logging(params: &Params) -> Result<LogGuard> {
    match &params.log_dir {
        Some(log_dir) => {
            let config = LogConfig {
                log_dir: log_dir.clone(),
                rotation: params.log_rotation,
                ..Default::default()
            };
            Ok(setup_file_logging(&config)?)
        }
        None => Ok(setup_console_logging()),
    }
}
