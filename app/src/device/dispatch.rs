use std::sync::Arc;

use futures::future::BoxFuture;

use super::{Device, DeviceControl, IrStep};

/// Live handle to a reachable smart plug.
pub trait PowerPlug: Send + Sync {
    fn set_power_state(&self, on: bool) -> BoxFuture<'_, anyhow::Result<()>>;
}

pub trait IrHub: Send + Sync {
    fn send_hold_action<'a>(&'a self, device_id: &'a str, action: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Device whose state is read and written by bespoke code.
pub trait DeviceFunction: Send + Sync {
    fn get(&self) -> BoxFuture<'_, anyhow::Result<Option<bool>>>;
    fn set(&self, on: bool) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Stand-in for sites without an IR hub.
pub struct UnavailableIrHub;

impl IrHub for UnavailableIrHub {
    fn send_hold_action<'a>(&'a self, device_id: &'a str, action: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move { anyhow::bail!("No IR hub configured for {} of {}", action, device_id) })
    }
}

pub struct DeviceDispatcher {
    ir_hub: Arc<dyn IrHub>,
}

impl DeviceDispatcher {
    pub fn new(ir_hub: Arc<dyn IrHub>) -> Self {
        Self { ir_hub }
    }

    /// Drives the hardware of a device. Commands to the same device never interleave.
    //Returns true if command was delivered to the hardware
    #[tracing::instrument(skip_all, fields(device = %device.name(), on))]
    pub async fn execute(&self, device: &Device, on: bool) -> anyhow::Result<bool> {
        let _guard = device.command_guard.lock().await;

        match device.control() {
            DeviceControl::SwitchedOutlet { host } => match device.plug() {
                Some(plug) => {
                    plug.set_power_state(on).await?;
                    Ok(true)
                }
                None => {
                    tracing::warn!("Ignoring command for offline smart plug {} at {}", device.name(), host);
                    Ok(false)
                }
            },

            DeviceControl::IrHubTarget {
                device_id,
                on_actions,
                off_actions,
            } => {
                let steps = if on { on_actions } else { off_actions };
                self.run_ir_sequence(device.name(), device_id, steps).await
            }

            DeviceControl::CustomFunction(function) => {
                function.set(on).await?;
                Ok(true)
            }
        }
    }

    async fn run_ir_sequence(&self, name: &str, device_id: &str, steps: &[IrStep]) -> anyhow::Result<bool> {
        let mut failed = 0;
        let mut actions = 0;

        for step in steps {
            match step {
                IrStep::Pause(duration) => tokio::time::sleep(*duration).await,
                IrStep::Action(action) => {
                    actions += 1;
                    if let Err(e) = self.ir_hub.send_hold_action(device_id, action).await {
                        tracing::warn!("Skipping IR action {} of {}: {:?}", action, name, e);
                        failed += 1;
                    }
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{} of {} IR actions for {} failed", failed, actions, name);
        }

        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::fakes::*;
    use super::*;

    fn ir_device() -> Device {
        Device::new(
            "receiver",
            DeviceControl::IrHubTarget {
                device_id: "56265870".to_string(),
                on_actions: vec![
                    IrStep::Action("PowerOn".to_string()),
                    IrStep::Pause(Duration::from_millis(2000)),
                    IrStep::Action("InputSat/Cbl".to_string()),
                ],
                off_actions: vec![IrStep::Action("PowerOff".to_string())],
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_offline_plug_is_ignored() {
        let dispatcher = DeviceDispatcher::new(Arc::new(FakeIrHub::default()));
        let device = Device::new(
            "lamp",
            DeviceControl::SwitchedOutlet {
                host: "lamp.local".to_string(),
            },
            None,
        );

        let delivered = dispatcher.execute(&device, true).await.unwrap();

        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_bound_plug_receives_command() {
        let dispatcher = DeviceDispatcher::new(Arc::new(FakeIrHub::default()));
        let device = Device::new(
            "lamp",
            DeviceControl::SwitchedOutlet {
                host: "lamp.local".to_string(),
            },
            None,
        );
        let (plug, mut commands) = FakePlug::new();
        device.bind_plug(plug);

        let delivered = dispatcher.execute(&device, false).await.unwrap();

        assert!(delivered);
        assert_eq!(commands.try_recv().ok(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ir_sequence_runs_in_order_with_pauses() {
        let hub = Arc::new(FakeIrHub::default());
        let dispatcher = DeviceDispatcher::new(hub.clone());
        let started = tokio::time::Instant::now();

        dispatcher.execute(&ir_device(), true).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert_eq!(
            hub.sent(),
            vec![
                ("56265870".to_string(), "PowerOn".to_string()),
                ("56265870".to_string(), "InputSat/Cbl".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ir_action_is_skipped() {
        let hub = Arc::new(FakeIrHub {
            failing_action: Some("PowerOn".to_string()),
            ..Default::default()
        });
        let dispatcher = DeviceDispatcher::new(hub.clone());

        let result = dispatcher.execute(&ir_device(), true).await;

        assert!(result.is_err());
        assert_eq!(hub.sent(), vec![("56265870".to_string(), "InputSat/Cbl".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_commands_to_one_device_do_not_interleave() {
        let hub = Arc::new(FakeIrHub::default());
        let dispatcher = DeviceDispatcher::new(hub.clone());
        let device = ir_device();

        let (on, off) = tokio::join!(dispatcher.execute(&device, true), dispatcher.execute(&device, false));

        assert!(on.unwrap());
        assert!(off.unwrap());
        assert_eq!(
            hub.sent(),
            vec![
                ("56265870".to_string(), "PowerOn".to_string()),
                ("56265870".to_string(), "InputSat/Cbl".to_string()),
                ("56265870".to_string(), "PowerOff".to_string()),
            ]
        );
    }
}
