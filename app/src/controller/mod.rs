use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use infrastructure::meter;
use tokio::time::Instant;

use crate::core::StateChange;

/// Outgoing channel to touch controllers.
pub trait ControllerLink {
    async fn send(&self, to: SocketAddr, change: &StateChange) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct Controller {
    last_seen: Option<Instant>,
}

impl Controller {
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    fn is_active(&self, now: Instant, forget_after: Duration) -> bool {
        self.last_seen
            .is_some_and(|seen| now.saturating_duration_since(seen) <= forget_after)
    }
}

/// Every touch controller that ever talked to us. Controllers are never removed, silent ones
/// just stop receiving updates until they talk again.
pub struct ControllerRegistry<L> {
    link: L,
    controllers: HashMap<SocketAddr, Controller>,
    reply_port: u16,
    forget_after: Duration,
}

impl<L: ControllerLink> ControllerRegistry<L> {
    pub fn new(link: L, reply_port: u16, forget_after: Duration) -> Self {
        Self {
            link,
            controllers: HashMap::new(),
            reply_port,
            forget_after,
        }
    }

    pub fn get(&self, address: &SocketAddr) -> Option<&Controller> {
        self.controllers.get(address)
    }

    /// Registers a message from `source`. New and returning controllers get the full state
    /// before anything else happens. Returns true if the full state was pushed.
    pub async fn greet(&mut self, source: IpAddr, now: Instant, full_state: impl FnOnce() -> Vec<StateChange>) -> bool {
        let address = SocketAddr::new(source, self.reply_port);

        let controller = self.controllers.entry(address).or_insert_with(|| {
            tracing::info!("New controller at {}", address);
            Controller::default()
        });

        let needs_full_state = !controller.is_active(now, self.forget_after);
        if needs_full_state {
            let state = full_state();
            tracing::info!("Sending {} values to controller {}", state.len(), address);

            for change in &state {
                if let Err(e) = self.link.send(address, change).await {
                    tracing::warn!("Error sending {} to {}: {:?}", change, address, e);
                }
            }
        }

        controller.last_seen = Some(now);
        meter::set("controllers_active", self.active(now).count() as f64, &[]);

        needs_full_state
    }

    pub async fn broadcast(&self, change: &StateChange, now: Instant) {
        for address in self.active(now) {
            if let Err(e) = self.link.send(address, change).await {
                tracing::warn!("Error sending {} to {}: {:?}", change, address, e);
            }
        }
    }

    pub fn active(&self, now: Instant) -> impl Iterator<Item = SocketAddr> + '_ {
        self.controllers
            .iter()
            .filter(move |(_, c)| c.is_active(now, self.forget_after))
            .map(|(address, _)| *address)
    }
}
