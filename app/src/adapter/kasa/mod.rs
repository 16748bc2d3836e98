mod protocol;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::core::resilience::ExponentialBackoff;
use crate::device::{Device, DeviceControl, OnState, PowerPlug};
use crate::home::{HardwareEvent, Home};

#[derive(Debug, Clone, Deserialize)]
pub struct KasaConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> u16 {
    9999
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for KasaConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl KasaConfig {
    pub fn new_runner(&self, home: Home, hardware: mpsc::Sender<HardwareEvent>) -> KasaRunner {
        KasaRunner {
            home,
            config: self.clone(),
            hardware,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SysInfo {
    #[serde(default)]
    pub alias: String,
    pub relay_state: u8,
}

impl SysInfo {
    pub fn is_on(&self) -> bool {
        self.relay_state != 0
    }
}

/// TP-Link Kasa smart plug spoken to over its local TCP protocol.
pub struct KasaPlug {
    address: String,
    timeout: Duration,
}

impl KasaPlug {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            timeout,
        }
    }

    async fn request(&self, request: &Value) -> anyhow::Result<Value> {
        let frame = protocol::encode_frame(&serde_json::to_vec(request)?);

        let exchange = async {
            let mut stream = TcpStream::connect(&self.address).await?;
            stream.write_all(&frame).await?;

            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await?;
            let len = u32::from_be_bytes(len) as usize;
            if len > protocol::MAX_FRAME_LEN {
                anyhow::bail!("Response of {} bytes is too large", len);
            }

            let mut body = vec![0; len];
            stream.read_exact(&mut body).await?;
            Ok::<_, anyhow::Error>(body)
        };

        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .with_context(|| format!("Timeout talking to Kasa device {}", self.address))??;

        serde_json::from_slice(&protocol::decrypt(&body))
            .with_context(|| format!("Invalid response from Kasa device {}", self.address))
    }

    #[tracing::instrument(skip(self), fields(address = %self.address))]
    pub async fn sysinfo(&self) -> anyhow::Result<SysInfo> {
        let mut response = self.request(&json!({"system": {"get_sysinfo": {}}})).await?;
        let info = response
            .pointer_mut("/system/get_sysinfo")
            .map(Value::take)
            .context("Missing sysinfo in response")?;
        Ok(serde_json::from_value(info)?)
    }

    #[tracing::instrument(skip(self), fields(address = %self.address))]
    pub async fn set_relay_state(&self, on: bool) -> anyhow::Result<()> {
        let response = self
            .request(&json!({"system": {"set_relay_state": {"state": u8::from(on)}}}))
            .await?;

        match response.pointer("/system/set_relay_state/err_code").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            code => anyhow::bail!("Kasa device {} rejected relay state with code {:?}", self.address, code),
        }
    }
}

impl PowerPlug for KasaPlug {
    fn set_power_state(&self, on: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self.set_relay_state(on))
    }
}

/// Binds every switched outlet to its plug and reports what the plugs see.
pub struct KasaRunner {
    home: Home,
    config: KasaConfig,
    hardware: mpsc::Sender<HardwareEvent>,
}

impl KasaRunner {
    pub async fn run(self) {
        let watchers = self
            .home
            .devices()
            .iter()
            .filter_map(|device| match device.control() {
                DeviceControl::SwitchedOutlet { host } => Some(self.watch_plug(device.clone(), host.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();

        if watchers.is_empty() {
            tracing::info!("No Kasa devices to watch");
            //keep the hardware channel open for the rest of the daemon
            return std::future::pending().await;
        }

        tracing::info!("Watching {} Kasa devices", watchers.len());
        futures::future::join_all(watchers).await;
    }

    async fn watch_plug(&self, device: Arc<Device>, host: String) {
        let plug = Arc::new(KasaPlug::new(
            &host,
            self.config.port,
            Duration::from_millis(self.config.timeout_ms),
        ));

        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let info = loop {
            match plug.sysinfo().await {
                Ok(info) => break info,
                Err(e) => {
                    tracing::warn!(
                        "Kasa device {} at {} is unreachable (attempt {}): {:?}",
                        device.name(),
                        host,
                        backoff.attempts() + 1,
                        e
                    );
                    backoff.wait().await;
                }
            }
        };

        tracing::info!(
            "Kasa device {} ({}) is {}",
            host,
            info.alias,
            OnState::from(info.is_on())
        );
        self.home.adopt_hardware_state(&device, info.is_on());
        device.bind_plug(plug.clone());

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match plug.sysinfo().await {
                Ok(info) => {
                    let event = HardwareEvent {
                        device: device.name().to_string(),
                        on: info.is_on(),
                    };
                    if self.hardware.send(event).await.is_err() {
                        tracing::error!("Hardware event channel closed, stop polling {}", device.name());
                        return;
                    }
                }
                Err(e) => tracing::debug!("Error polling {}: {:?}", device.name(), e),
            }
        }
    }
}
