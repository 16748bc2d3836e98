use std::sync::Arc;

use infrastructure::EventBus;
use settings::Settings;
use tokio::sync::mpsc;

use crate::device::{IrHub, UnavailableIrHub};
use crate::home::{HardwareRunner, Home, HomeTable};

mod adapter;
mod controller;
mod core;
mod device;
mod home;
mod lighting;
mod parameter;
mod scene;
mod settings;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.monitoring.init().expect("Error initializing monitoring");

    let table = HomeTable::load(&settings.home_table).expect("Error loading home table");

    let harmony = settings
        .harmony
        .as_ref()
        .map(|config| config.new_hub().expect("Error initializing Harmony hub"));
    let ir_hub: Arc<dyn IrHub> = match &harmony {
        Some(hub) => hub.clone(),
        None => {
            tracing::info!("No Harmony hub configured, IR devices are unavailable");
            Arc::new(UnavailableIrHub)
        }
    };

    let bus = EventBus::new(1024);
    let home = Home::new(table, ir_hub, bus.emitter());

    let (hardware_tx, hardware_rx) = mpsc::channel(256);
    let hardware_runner = HardwareRunner::new(home.clone(), hardware_rx);
    let kasa_runner = settings.kasa.new_runner(home.clone(), hardware_tx);

    let osc_runner = settings
        .osc
        .new_runner(home.clone(), bus.subscribe())
        .await
        .expect("Error initializing OSC server");

    let lighting_runner = settings
        .lighting
        .new_runner(home.clone())
        .expect("Error initializing lighting output");

    let http_server_exec = {
        let home = home.clone();

        async move {
            settings
                .http_server
                .run_server(move || vec![adapter::voice::new_web_service(home.clone())])
                .await
                .expect("HTTP server execution failed");
        }
    };

    let harmony_exec = async move {
        match harmony {
            Some(hub) => hub.keep_connected().await,
            None => std::future::pending().await,
        }
    };

    tracing::info!("Probing initial device states");
    home.read_custom_function_states().await;

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = osc_runner.run() => {},
        _ = hardware_runner.run() => {},
        _ = kasa_runner.run() => {},
        _ = lighting_runner.run() => {},
        _ = http_server_exec => {},
        _ = harmony_exec => {},
    );
}
