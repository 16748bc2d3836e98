mod message;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use infrastructure::EventListener;
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::controller::{ControllerLink, ControllerRegistry};
use crate::core::StateChange;
use crate::home::Home;

pub use message::TouchCommand;

#[derive(Debug, Clone, Deserialize)]
pub struct OscConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_reply_port")]
    pub reply_port: u16,
    #[serde(default = "default_forget_after_secs")]
    pub forget_after_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    7009
}

fn default_reply_port() -> u16 {
    9000
}

fn default_forget_after_secs() -> u64 {
    60 * 60
}

impl OscConfig {
    pub async fn new_runner(&self, home: Home, events: EventListener<StateChange>) -> anyhow::Result<OscRunner> {
        let socket = UdpSocket::bind((self.bind_address.as_str(), self.listen_port))
            .await
            .with_context(|| format!("Error binding OSC socket to {}:{}", self.bind_address, self.listen_port))?;
        let socket = Arc::new(socket);

        tracing::info!("OSC server listening on {}", socket.local_addr()?);

        let link = OscLink { socket: socket.clone() };
        let registry = ControllerRegistry::new(link, self.reply_port, Duration::from_secs(self.forget_after_secs));

        Ok(OscRunner {
            socket,
            registry,
            home,
            events,
        })
    }
}

pub struct OscLink {
    socket: Arc<UdpSocket>,
}

impl ControllerLink for OscLink {
    async fn send(&self, to: SocketAddr, change: &StateChange) -> anyhow::Result<()> {
        let datagram = message::encode(change)?;
        self.socket.send_to(&datagram, to).await?;
        Ok(())
    }
}

pub struct OscRunner {
    socket: Arc<UdpSocket>,
    registry: ControllerRegistry<OscLink>,
    home: Home,
    events: EventListener<StateChange>,
}

impl OscRunner {
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) {
        let mut buf = vec![0; rosc::decoder::MTU];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => self.handle_datagram(&buf[..len], source).await,
                    Err(e) => tracing::error!("Error receiving OSC datagram: {:?}", e),
                },

                Some(change) = self.events.recv() => {
                    self.registry.broadcast(&change, Instant::now()).await;
                }
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr) {
        let messages = match message::decode(datagram) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Ignoring datagram from {}: {:?}", source, e);
                return;
            }
        };

        for message in messages {
            tracing::debug!("OSC message from {}: {} {:?}", source, message.addr, message.args);

            let home = &self.home;
            self.registry
                .greet(source.ip(), Instant::now(), || home.full_state())
                .await;

            self.apply(TouchCommand::route(&message, |path| self.home.parameters().contains(path)));
        }
    }

    fn apply(&self, command: TouchCommand) {
        match command {
            TouchCommand::SetParameter { path, value } => {
                tracing::info!("Setting {} to {}", path, value);
                self.home.set_parameter(&path, value);
            }
            TouchCommand::ToggleDevice(name) => self.home.toggle_device(&name),
            TouchCommand::TriggerScene(name) => {
                self.home.trigger_scene(&name);
            }
            TouchCommand::Ignore => {}
            TouchCommand::Unknown(path) => tracing::warn!("Unknown OSC path {}", path),
        }
    }
}
