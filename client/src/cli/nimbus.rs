mod commands;
mod utils;

use clap::Parser;
use clap_derive::Subcommand;
use nimbus_client::StatusStoreError;
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug, Default, Clone)]
enum Commands {
    /// Print every status snapshot until interrupted
    #[default]
    Listen,
    /// Read a path of the status record ("/" for the whole record)
    Get {
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Write a JSON value at a path
    Set {
        #[arg(long)]
        path: String,
        #[arg(long)]
        value: String,
    },
    /// Remove a path, e.g. countdownModel
    Delete {
        #[arg(long)]
        path: String,
    },
    /// Create the default record if the store holds none
    Init,
}

#[derive(Parser, Debug)]
struct Params {
    #[clap(long, env = "NIMBUS_MQTT_HOST", default_value = "localhost")]
    host: String,
    #[clap(long, default_value = "1883")]
    port: u16,
    #[clap(long, env = "NIMBUS_MQTT_USER")]
    user: Option<String>,
    #[clap(long, env = "NIMBUS_MQTT_PASSWORD")]
    password: Option<String>,
    #[clap(long, default_value = nimbus_client::DEFAULT_ROOT_TOPIC)]
    root_topic: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), StatusStoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let params = Params::parse();

    match &params.command.clone() {
        Commands::Listen => commands::listen(params).await?,
        Commands::Get { path } => commands::get(params, path).await?,
        Commands::Set { path, value } => commands::set(params, path, value).await?,
        Commands::Delete { path } => commands::delete(params, path).await?,
        Commands::Init => commands::init(params).await?,
    }

    Ok(())
}
