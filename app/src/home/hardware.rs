use tokio::sync::mpsc;

use super::Home;

/// State of a device as reported by its vendor client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareEvent {
    pub device: String,
    pub on: bool,
}

/// Feeds vendor state reports into the home one at a time.
pub struct HardwareRunner {
    home: Home,
    rx: mpsc::Receiver<HardwareEvent>,
}

impl HardwareRunner {
    pub fn new(home: Home, rx: mpsc::Receiver<HardwareEvent>) -> Self {
        Self { home, rx }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.home.on_hardware_device_state_change(&event.device, event.on);
        }

        tracing::error!("All hardware state reporters are gone");
    }
}
