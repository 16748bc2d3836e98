use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use infrastructure::HttpClientConfig;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::core::resilience::ExponentialBackoff;
use crate::device::IrHub;

const ORIGIN: &str = "http://sl.dhg.myharmony.com";
const KEEP_ALIVE: Duration = Duration::from_secs(50);

#[derive(Debug, Clone, Deserialize)]
pub struct HarmonyConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8088
}

impl HarmonyConfig {
    pub fn new_hub(&self) -> anyhow::Result<Arc<HarmonyHub>> {
        let http = HttpClientConfig::new(Some(ORIGIN.to_string()), Some(Duration::from_secs(10)))
            .new_tracing_client()
            .context("Error creating Harmony HTTP client")?;

        Ok(Arc::new(HarmonyHub {
            config: self.clone(),
            http,
            connection: Mutex::new(None),
            disconnected: Notify::new(),
            message_id: AtomicU64::new(1),
            connection_id: AtomicU64::new(0),
        }))
    }
}

type HubSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct HubConnection {
    id: u64,
    hub_id: String,
    sink: HubSink,
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    data: ProvisionInfo,
}

#[derive(Debug, Deserialize)]
struct ProvisionInfo {
    #[serde(rename = "activeRemoteId")]
    active_remote_id: Value,
}

impl ProvisionInfo {
    fn hub_id(&self) -> anyhow::Result<String> {
        match &self.active_remote_id {
            Value::Number(id) => Ok(id.to_string()),
            Value::String(id) if !id.is_empty() => Ok(id.clone()),
            other => anyhow::bail!("Unexpected remote id {}", other),
        }
    }
}

/// Logitech Harmony hub, driven over its local websocket API.
pub struct HarmonyHub {
    config: HarmonyConfig,
    http: ClientWithMiddleware,
    connection: Mutex<Option<HubConnection>>,
    disconnected: Notify,
    message_id: AtomicU64,
    connection_id: AtomicU64,
}

impl HarmonyHub {
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Connects and reconnects to the hub for as long as the daemon runs.
    pub async fn keep_connected(self: Arc<Self>) {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));

        loop {
            if !self.is_connected().await {
                match self.connect().await {
                    Ok(()) => backoff.reset(),
                    Err(e) => {
                        tracing::warn!(
                            "Error connecting to Harmony hub {} (attempt {}): {:?}",
                            self.config.host,
                            backoff.attempts() + 1,
                            e
                        );
                        backoff.wait().await;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = self.disconnected.notified() => {
                    tracing::warn!("Lost connection to Harmony hub {}", self.config.host);
                }
                _ = tokio::time::sleep(KEEP_ALIVE) => self.ping().await,
            }
        }
    }

    async fn provision(&self) -> anyhow::Result<String> {
        let url = format!("http://{}:{}", self.config.host, self.config.port);
        let request = json!({
            "id": 1,
            "cmd": "setup.account?getProvisionInfo",
            "timeout": 90000,
        });

        let response: ProvisionResponse = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "utf-8")
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.data.hub_id()
    }

    #[tracing::instrument(skip(self), fields(host = %self.config.host))]
    async fn connect(self: &Arc<Self>) -> anyhow::Result<()> {
        let hub_id = self.provision().await.context("Error provisioning Harmony hub")?;
        let url = format!(
            "ws://{}:{}/?domain=svcs.myharmony.com&hubId={}",
            self.config.host, self.config.port, hub_id
        );

        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut reader) = stream.split();
        let id = self.connection_id.fetch_add(1, Ordering::Relaxed) + 1;

        let config_request = config_request_message(&hub_id, self.message_id.fetch_add(1, Ordering::Relaxed));
        sink.send(Message::text(config_request.to_string()))
            .await
            .context("Error requesting Harmony hub config")?;

        *self.connection.lock().await = Some(HubConnection { id, hub_id, sink });
        tracing::info!("Connected to Harmony hub {}", self.config.host);

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => log_hub_message(text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Error reading from Harmony hub: {:?}", e);
                        break;
                    }
                }
            }
            hub.drop_connection(id).await;
        });

        Ok(())
    }

    async fn drop_connection(&self, id: u64) {
        let mut connection = self.connection.lock().await;
        if connection.as_ref().is_some_and(|c| c.id == id) {
            *connection = None;
            self.disconnected.notify_one();
        }
    }

    async fn ping(&self) {
        let mut connection = self.connection.lock().await;
        let Some(active) = connection.as_mut() else {
            return;
        };

        let sent = active.sink.send(Message::Ping(Default::default())).await;
        if let Err(e) = sent {
            tracing::warn!("Error pinging Harmony hub: {:?}", e);
            *connection = None;
            self.disconnected.notify_one();
        }
    }

    #[tracing::instrument(skip(self))]
    async fn send_hold(&self, device_id: &str, action: &str) -> anyhow::Result<()> {
        let mut connection = self.connection.lock().await;
        let Some(active) = connection.as_mut() else {
            anyhow::bail!("Harmony hub is not connected");
        };

        tracing::info!("Sending {} to {}", action, device_id);

        for status in ["press", "release"] {
            let message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
            let message = hold_action_message(&active.hub_id, message_id, device_id, action, status);
            let sent = active.sink.send(Message::text(message.to_string())).await;

            if let Err(e) = sent {
                *connection = None;
                self.disconnected.notify_one();
                return Err(e).context("Error sending to Harmony hub");
            }
        }

        Ok(())
    }
}

impl IrHub for HarmonyHub {
    fn send_hold_action<'a>(&'a self, device_id: &'a str, action: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.send_hold(device_id, action))
    }
}

const CONFIG_CMD: &str = "vnd.logitech.harmony/vnd.logitech.harmony.engine?config";

fn config_request_message(hub_id: &str, message_id: u64) -> Value {
    json!({
        "hubId": hub_id,
        "timeout": 30,
        "hbus": {
            "cmd": CONFIG_CMD,
            "id": message_id.to_string(),
            "params": {"verb": "get"},
        },
    })
}

#[derive(Debug, Deserialize)]
struct HubConfig {
    #[serde(default)]
    device: Vec<HubDevice>,
}

#[derive(Debug, Deserialize)]
struct HubDevice {
    id: String,
    #[serde(default)]
    label: String,
    #[serde(rename = "controlGroup", default)]
    control_groups: Vec<ControlGroup>,
}

#[derive(Debug, Deserialize)]
struct ControlGroup {
    #[serde(default)]
    function: Vec<Value>,
}

impl HubDevice {
    fn action_count(&self) -> usize {
        self.control_groups.iter().map(|group| group.function.len()).sum()
    }
}

/// Devices listed in a config answer, `None` for any other hub message.
fn detected_devices(text: &str) -> Option<Vec<HubDevice>> {
    let message: Value = serde_json::from_str(text).ok()?;
    if message.get("cmd").and_then(Value::as_str) != Some(CONFIG_CMD) {
        return None;
    }

    let config: HubConfig = serde_json::from_value(message.get("data")?.clone()).ok()?;
    Some(config.device)
}

fn log_hub_message(text: &str) {
    match detected_devices(text) {
        Some(devices) => {
            for device in devices {
                tracing::info!(
                    "Detected Harmony device {} ({}), {} actions",
                    device.id,
                    device.label,
                    device.action_count()
                );
            }
        }
        None => tracing::trace!("Harmony hub says {}", text),
    }
}

fn hold_action_message(hub_id: &str, message_id: u64, device_id: &str, action: &str, status: &str) -> Value {
    let command = json!({
        "command": action,
        "type": "IRCommand",
        "deviceId": device_id,
    });

    json!({
        "hubId": hub_id,
        "timeout": 30,
        "hbus": {
            "cmd": "vnd.logitech.harmony/vnd.logitech.harmony.engine?holdAction",
            "id": message_id.to_string(),
            "params": {
                "action": command.to_string(),
                "status": status,
                "timestamp": "0",
                "verb": "render",
            },
        },
    })
}
