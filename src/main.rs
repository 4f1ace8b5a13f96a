use clap::{Parser, ValueEnum};
use haa_emulator::{
    hap::emulator_event::EmulatorEvent,
    lifecycle::{EmulatorConfig, Profile},
    server::ServerConfig,
    store::{FsStore, Store},
    Controller, HttpServer,
};
use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// HAA device emulator for testing controller apps without hardware.
#[derive(Parser, Debug)]
#[command(name = "haa-emulator", disable_version_flag = true)]
struct Args {
    /// Device firmware version
    #[arg(long, env = "HAA_FIRMWARE", default_value = "11.9.1")]
    version: String,

    /// Device model name
    #[arg(long, env = "HAA_MODEL", default_value = "RavenSystem HAA Peregrine")]
    model: String,

    /// Serial number
    #[arg(long, env = "HAA_SERIAL", default_value = "112233")]
    sn: String,

    /// Kind of device to emulate
    #[arg(long, env = "HAA_PROFILE", value_enum, default_value_t = ProfileArg::Switch)]
    profile: ProfileArg,

    /// Directory holding pairing state between runs
    #[arg(long, env = "HAA_STORAGE", default_value = "./db")]
    storage: PathBuf,

    #[arg(long, env = "HAA_BIND", default_value = "0.0.0.0:51826")]
    bind: SocketAddr,

    /// Seconds between autonomous switch toggles
    #[arg(long, env = "HAA_TOGGLE_SECS", default_value_t = 20)]
    toggle_secs: u64,

    /// Seconds between temperature readings
    #[arg(long, env = "HAA_SAMPLE_SECS", default_value_t = 3)]
    sample_secs: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProfileArg {
    Switch,
    TemperatureSensor,
}

impl From<ProfileArg> for Profile {
    fn from(profile: ProfileArg) -> Profile {
        match profile {
            ProfileArg::Switch => Profile::Switch,
            ProfileArg::TemperatureSensor => Profile::TemperatureSensor,
        }
    }
}

/// Logging filters from `RUST_LOG`, `info` when unset or empty.
fn log_filters(rust_log: Option<String>) -> String {
    match rust_log {
        Some(filters) if !filters.trim().is_empty() => filters,
        _ => "info".to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = pretty_env_logger::formatted_builder()
        .parse_filters(&log_filters(std::env::var("RUST_LOG").ok()))
        .try_init()
    {
        eprintln!("WARNING: failed to initialize logging framework: {}", err);
    }

    let args = Args::parse();
    let mut config = EmulatorConfig::for_profile(args.profile.into());
    config.info.serial_number = args.sn;
    config.info.model = args.model;
    config.info.firmware = args.version;
    config.toggle_interval = Duration::from_secs(args.toggle_secs.max(1));
    config.sample_interval = Duration::from_secs(args.sample_secs.max(1));
    let server_config = ServerConfig {
        bind_addr: args.bind,
        ..Default::default()
    };

    let store: Arc<dyn Store> = match FsStore::open(&args.storage).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<EmulatorEvent>();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            handle_event(event);
        }
    });

    let controller = Controller::new(config, events_tx);
    match controller
        .run_until_signal::<HttpServer>(store, server_config)
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Producers already log their reports; this only traces the event stream.
fn handle_event(event: EmulatorEvent) {
    match event {
        EmulatorEvent::StateUpdate { state } => log::debug!("Lifecycle: {state:?}"),
        EmulatorEvent::SwitchUpdate { on, origin } => {
            log::debug!("SwitchUpdate: on={on} origin={origin:?}")
        }
        EmulatorEvent::TemperatureUpdate { celsius } => {
            log::debug!("TemperatureUpdate: {celsius}")
        }
        EmulatorEvent::ConfigIdentifierUpdate { identifier } => {
            log::debug!("ConfigIdentifierUpdate: {identifier:?}")
        }
        EmulatorEvent::Identify => log::debug!("Identify"),
    }
}
