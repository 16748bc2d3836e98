pub mod behavior;
mod dispatch;

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use derive_more::Display;
use indexmap::IndexMap;
use infrastructure::EventEmitter;

use crate::core::StateChange;
use behavior::SwitchBehavior;

pub use dispatch::{DeviceDispatcher, DeviceFunction, IrHub, PowerPlug, UnavailableIrHub};

#[cfg(test)]
pub(crate) use dispatch::fakes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum OnState {
    #[default]
    #[display("unknown")]
    Unknown,
    #[display("off")]
    Off,
    #[display("on")]
    On,
}

impl From<bool> for OnState {
    fn from(on: bool) -> Self {
        if on { OnState::On } else { OnState::Off }
    }
}

impl OnState {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            OnState::Unknown => None,
            OnState::Off => Some(false),
            OnState::On => Some(true),
        }
    }
}

/// One element of an IR action sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrStep {
    Pause(Duration),
    Action(String),
}

pub enum DeviceControl {
    SwitchedOutlet {
        host: String,
    },
    IrHubTarget {
        device_id: String,
        on_actions: Vec<IrStep>,
        off_actions: Vec<IrStep>,
    },
    CustomFunction(Arc<dyn DeviceFunction>),
}

impl Debug for DeviceControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceControl::SwitchedOutlet { host } => f.debug_struct("SwitchedOutlet").field("host", host).finish(),
            DeviceControl::IrHubTarget {
                device_id,
                on_actions,
                off_actions,
            } => f
                .debug_struct("IrHubTarget")
                .field("device_id", device_id)
                .field("on_actions", on_actions)
                .field("off_actions", off_actions)
                .finish(),
            DeviceControl::CustomFunction(_) => f.write_str("CustomFunction"),
        }
    }
}

#[derive(Default)]
struct DeviceRuntime {
    on: OnState,
    plug: Option<Arc<dyn PowerPlug>>,
}

pub struct Device {
    name: String,
    control: DeviceControl,
    behavior: Option<SwitchBehavior>,
    runtime: Mutex<DeviceRuntime>,
    command_guard: tokio::sync::Mutex<()>,
}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("control", &self.control)
            .field("on", &self.on_state())
            .finish()
    }
}

impl Device {
    pub fn new(name: impl Into<String>, control: DeviceControl, behavior: Option<SwitchBehavior>) -> Self {
        Self {
            name: name.into(),
            control,
            behavior,
            runtime: Mutex::new(DeviceRuntime::default()),
            command_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn control(&self) -> &DeviceControl {
        &self.control
    }

    pub fn behavior(&self) -> Option<&SwitchBehavior> {
        self.behavior.as_ref()
    }

    fn runtime(&self) -> MutexGuard<'_, DeviceRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_state(&self) -> OnState {
        self.runtime().on
    }

    /// Returns true if the recorded state changed.
    fn record(&self, on: bool) -> bool {
        let mut runtime = self.runtime();
        let changed = runtime.on != OnState::from(on);
        runtime.on = on.into();
        changed
    }

    /// Binds the live smart-plug handle once the plug was found reachable.
    pub fn bind_plug(&self, plug: Arc<dyn PowerPlug>) {
        self.runtime().plug = Some(plug);
    }

    pub fn plug(&self) -> Option<Arc<dyn PowerPlug>> {
        self.runtime().plug.clone()
    }
}

/// All controllable devices by name, in table order.
pub struct DeviceRegistry {
    devices: IndexMap<String, Arc<Device>>,
    events: EventEmitter<StateChange>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Device>, events: EventEmitter<StateChange>) -> Self {
        let devices = devices
            .into_iter()
            .map(|device| (device.name.clone(), Arc::new(device)))
            .collect();

        Self { devices, events }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// Records the state and broadcasts it. Returns true if the state changed.
    pub fn record(&self, device: &Device, on: bool) -> bool {
        let changed = device.record(on);
        self.events.send(StateChange::device(&device.name, on));
        changed
    }

    /// Records a state reported by the hardware, broadcasting it only when it changed.
    // Plugs are polled every few hundred milliseconds, repeating unchanged readings to
    // controllers would flood them. Commands go through `record` and always broadcast.
    pub fn observe(&self, device: &Device, on: bool) -> bool {
        let changed = device.record(on);
        if changed {
            self.events.send(StateChange::device(&device.name, on));
        }
        changed
    }

    pub fn known_states(&self) -> Vec<StateChange> {
        self.devices
            .values()
            .filter_map(|device| {
                device
                    .on_state()
                    .as_bool()
                    .map(|on| StateChange::device(&device.name, on))
            })
            .collect()
    }
}
