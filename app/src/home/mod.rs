mod hardware;
mod table;

use std::collections::HashMap;
use std::sync::Arc;

use infrastructure::{EventEmitter, meter};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::StateChange;
use crate::device::behavior::{OneButtonSwitch, Press, SwitchBehavior};
use crate::device::{Device, DeviceControl, DeviceDispatcher, DeviceRegistry, IrHub, OnState};
use crate::parameter::ParameterStore;
use crate::scene::{SceneBook, SceneStep, SceneValue, VOICE_KEY};

pub use hardware::{HardwareEvent, HardwareRunner};
pub use table::HomeTable;

/// Handle to the whole controllable home. Cheap to clone.
#[derive(Clone)]
pub struct Home {
    inner: Arc<HomeInner>,
}

struct HomeInner {
    devices: DeviceRegistry,
    parameters: ParameterStore,
    scenes: SceneBook,
    dispatcher: DeviceDispatcher,
}

impl Home {
    pub fn new(table: HomeTable, ir_hub: Arc<dyn IrHub>, events: EventEmitter<StateChange>) -> Self {
        Self {
            inner: Arc::new(HomeInner {
                devices: DeviceRegistry::new(table.devices, events.clone()),
                parameters: ParameterStore::new(events),
                scenes: table.scenes,
                dispatcher: DeviceDispatcher::new(ir_hub),
            }),
        }
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.inner.devices
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.inner.parameters
    }

    /// Applies every entry of a scene in order. Device commands are dispatched without waiting
    /// for the hardware, so one slow device never holds up the rest.
    #[tracing::instrument(skip(self))]
    pub fn trigger_scene(&self, name: &str) -> Vec<SceneStep> {
        let Some(scene) = self.inner.scenes.get(name) else {
            tracing::warn!("No such scene {}", name);
            return vec![];
        };

        tracing::info!("Triggering scene {}", name);
        meter::increment("scene_triggered", &[("scene", name)]);

        scene
            .targets
            .iter()
            .map(|(key, value)| self.apply_scene_target(name, key, value))
            .collect()
    }

    fn apply_scene_target(&self, scene: &str, key: &str, value: &SceneValue) -> SceneStep {
        if key == VOICE_KEY {
            return SceneStep::Metadata;
        }

        let Some(level) = value.as_level() else {
            tracing::warn!("Ignoring non-scalar value of {} in scene {}", key, scene);
            return SceneStep::Unknown { key: key.to_string() };
        };

        if let Some(device) = self.inner.devices.get(key) {
            let on = level != 0.0;
            self.set_device_state(device, on);
            SceneStep::Device {
                name: key.to_string(),
                on,
            }
        } else if self.inner.parameters.set(key, level) {
            SceneStep::Parameter {
                path: key.to_string(),
                value: level,
            }
        } else {
            tracing::warn!("Unknown key {} in scene {}", key, scene);
            SceneStep::Unknown { key: key.to_string() }
        }
    }

    /// Records and broadcasts the requested state, then drives the hardware in the background.
    pub fn set_device_state(&self, device: &Arc<Device>, on: bool) -> JoinHandle<anyhow::Result<bool>> {
        self.inner.devices.record(device, on);

        let home = self.clone();
        let device = device.clone();

        tokio::spawn(async move {
            let result = home.inner.dispatcher.execute(&device, on).await;
            if let Err(e) = &result {
                tracing::error!("Error switching {} {}: {:?}", device.name(), OnState::from(on), e);
                meter::increment("device_command_failed", &[("device", device.name())]);
            }
            result
        })
    }

    pub fn toggle_device(&self, name: &str) {
        match self.inner.devices.get(name) {
            Some(device) => {
                let on = device.on_state() != OnState::On;
                self.set_device_state(device, on);
            }
            None => tracing::warn!("Cannot toggle unknown device {}", name),
        }
    }

    pub fn set_parameter(&self, path: &str, value: f64) -> bool {
        self.inner.parameters.set(path, value)
    }

    pub fn match_voice_intent(&self, intent: &str, slots: &HashMap<String, String>) -> Option<String> {
        self.inner.scenes.match_voice_intent(intent, slots).map(str::to_string)
    }

    /// Current parameters followed by every device with a known state.
    pub fn full_state(&self) -> Vec<StateChange> {
        self.inner
            .parameters
            .snapshot()
            .into_iter()
            .map(|(path, value)| StateChange::new(path, value))
            .chain(self.inner.devices.known_states())
            .collect()
    }

    /// Adopts the state of freshly bound hardware without treating it as a press.
    pub fn adopt_hardware_state(&self, device: &Device, on: bool) {
        self.inner.devices.observe(device, on);
    }

    /// Reads the initial state of every device driven by custom code.
    pub async fn read_custom_function_states(&self) {
        for device in self.inner.devices.iter() {
            let DeviceControl::CustomFunction(function) = device.control() else {
                continue;
            };

            match function.get().await {
                Ok(Some(on)) => {
                    tracing::info!("{} is initially {}", device.name(), OnState::from(on));
                    self.inner.devices.observe(device, on);
                }
                Ok(None) => tracing::info!("State of {} is unknown", device.name()),
                Err(e) => tracing::warn!("Error reading initial state of {}: {:?}", device.name(), e),
            }
        }
    }

    /// Entry point for state changes observed on the hardware, e.g. a physical switch flip.
    #[tracing::instrument(skip(self))]
    pub fn on_hardware_device_state_change(&self, name: &str, on: bool) {
        let Some(device) = self.inner.devices.get(name) else {
            tracing::debug!("Ignoring state of unknown device {}", name);
            return;
        };

        let changed = self.inner.devices.observe(device, on);
        if changed {
            tracing::info!("{} was switched {}", name, OnState::from(on));
        }

        match device.behavior() {
            Some(SwitchBehavior::Toggle(toggle)) if changed => {
                self.trigger_scene(toggle.scene_for(on));
            }
            Some(SwitchBehavior::OneButton(switch)) => self.press_one_button(device, switch, on, changed),
            _ => {}
        }
    }

    fn press_one_button(&self, device: &Arc<Device>, switch: &OneButtonSwitch, on: bool, changed: bool) {
        let selected = {
            let mut state = switch.state();
            let now = Instant::now();
            let previous_push = state.last_push();

            match state.register(on, changed, switch.scene_list().len(), now) {
                Press::Echo => {
                    tracing::debug!("Absorbed echo of corrective write to {}", device.name());
                    return;
                }
                Press::Unchanged => return,
                Press::Selected(selected) => {
                    tracing::debug!(
                        "Press on {} selects {:?}, {:?} after the previous one",
                        device.name(),
                        selected,
                        previous_push.map(|at| now.saturating_duration_since(at))
                    );
                    let generation = state.open_window();
                    let timer = tokio::spawn(self.clone().close_selection_window(device.clone(), generation));
                    state.attach_timer(generation, timer);
                    selected
                }
            }
        };

        self.trigger_scene(switch.scene_for(selected));
    }

    async fn close_selection_window(self, device: Arc<Device>, generation: u64) {
        let Some(SwitchBehavior::OneButton(switch)) = device.behavior() else {
            return;
        };

        tokio::time::sleep(switch.selection_timeout()).await;

        {
            let mut state = switch.state();
            if !state.close_window(generation) || device.on_state() == OnState::On {
                return;
            }
            state.begin_transition(true);
        }

        tracing::info!("Switching {} back on to restore its indicator", device.name());

        match self.set_device_state(&device, true).await {
            Ok(Ok(true)) => {}
            _ => switch.state().abandon_transition(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use infrastructure::{EventBus, EventListener};

    use super::*;
    use crate::device::behavior::ToggleSwitch;
    use crate::device::fakes::{FakeIrHub, FakePlug};
    use crate::scene::{Scene, VoiceRule};

    fn outlet(name: &str, behavior: Option<SwitchBehavior>) -> Device {
        Device::new(
            name,
            DeviceControl::SwitchedOutlet {
                host: format!("{}.local", name),
            },
            behavior,
        )
    }

    fn scene(name: &str, targets: &[(&str, SceneValue)]) -> Scene {
        Scene {
            name: name.to_string(),
            targets: targets.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    fn home(devices: Vec<Device>, scenes: Vec<Scene>) -> (Home, EventListener<StateChange>) {
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        let table = HomeTable {
            devices,
            scenes: SceneBook::new(scenes),
        };
        (Home::new(table, Arc::new(FakeIrHub::default()), bus.emitter()), events)
    }

    fn drain(events: &mut EventListener<StateChange>) -> Vec<StateChange> {
        std::iter::from_fn(|| events.try_recv()).collect()
    }

    fn one_button_switch() -> SwitchBehavior {
        SwitchBehavior::OneButton(OneButtonSwitch::new(
            vec!["pattern".to_string(), "work-lights".to_string()],
            "rafters-off".to_string(),
            Duration::from_millis(2000),
        ))
    }

    fn rafter_scenes() -> Vec<Scene> {
        vec![
            scene("pattern", &[("/lights/pattern/brightness", SceneValue::Level(1.0))]),
            scene("work-lights", &[("/lights/work/brightness", SceneValue::Level(1.0))]),
            scene(
                "rafters-off",
                &[
                    ("/lights/pattern/brightness", SceneValue::Level(0.0)),
                    ("/lights/work/brightness", SceneValue::Level(0.0)),
                ],
            ),
        ]
    }

    fn selection(home: &Home, name: &str) -> Option<usize> {
        match home.devices().get(name).and_then(|d| d.behavior()) {
            Some(SwitchBehavior::OneButton(switch)) => switch.state().selected(),
            _ => panic!("{} has no one-button behavior", name),
        }
    }

    #[tokio::test]
    async fn test_scene_drives_plug_and_broadcasts_parameter() {
        let (home, mut events) = home(
            vec![outlet("lamp", None)],
            vec![scene(
                "evening",
                &[
                    ("lamp", SceneValue::Switch(true)),
                    ("/lights/warm/brightness", SceneValue::Level(0.25)),
                ],
            )],
        );
        let (plug, mut commands) = FakePlug::new();
        home.devices().get("lamp").unwrap().bind_plug(plug);

        let steps = home.trigger_scene("evening");

        assert_eq!(
            steps,
            vec![
                SceneStep::Device {
                    name: "lamp".to_string(),
                    on: true
                },
                SceneStep::Parameter {
                    path: "/lights/warm/brightness".to_string(),
                    value: 0.25
                },
            ]
        );
        assert_eq!(commands.recv().await, Some(true));
        assert!(commands.try_recv().is_err());

        let changes = drain(&mut events);
        assert_eq!(changes[0], StateChange::device("lamp", true));
        assert_eq!(
            changes
                .iter()
                .filter(|c| **c == StateChange::new("/lights/warm/brightness", 0.25))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_scene_and_keys_are_skipped() {
        let (home, _events) = home(
            vec![],
            vec![scene(
                "odd",
                &[
                    ("/lights/disco/brightness", SceneValue::Level(1.0)),
                    (
                        VOICE_KEY,
                        SceneValue::Voice(vec![VoiceRule {
                            intent: "OddIntent".to_string(),
                            slots: Default::default(),
                        }]),
                    ),
                    ("/pattern/speed", SceneValue::Level(0.5)),
                ],
            )],
        );

        assert!(home.trigger_scene("missing").is_empty());
        assert_eq!(
            home.trigger_scene("odd"),
            vec![
                SceneStep::Unknown {
                    key: "/lights/disco/brightness".to_string()
                },
                SceneStep::Metadata,
                SceneStep::Parameter {
                    path: "/pattern/speed".to_string(),
                    value: 0.5
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_toggle_switch_triggers_scene_on_change_only() {
        let toggle = SwitchBehavior::Toggle(ToggleSwitch {
            on_scene: "lamps-on".to_string(),
            off_scene: "lamps-off".to_string(),
        });
        let (home, _events) = home(
            vec![outlet("207r-switch", Some(toggle)), outlet("lamp", None)],
            vec![
                scene("lamps-on", &[("lamp", SceneValue::Switch(true))]),
                scene("lamps-off", &[("lamp", SceneValue::Switch(false))]),
            ],
        );
        let (plug, mut commands) = FakePlug::new();
        home.devices().get("lamp").unwrap().bind_plug(plug);

        home.on_hardware_device_state_change("207r-switch", true);
        assert_eq!(commands.recv().await, Some(true));

        home.on_hardware_device_state_change("207r-switch", true);
        home.on_hardware_device_state_change("207r-switch", false);
        assert_eq!(commands.recv().await, Some(false));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_button_cycles_then_restores_indicator() {
        let (home, _events) = home(vec![outlet("207l-switch", Some(one_button_switch()))], rafter_scenes());
        let (plug, mut commands) = FakePlug::new();
        home.devices().get("207l-switch").unwrap().bind_plug(plug);

        home.on_hardware_device_state_change("207l-switch", true);
        assert_eq!(selection(&home, "207l-switch"), Some(0));
        assert_eq!(home.parameters().get("/lights/pattern/brightness"), Some(1.0));

        tokio::time::sleep(Duration::from_millis(500)).await;
        home.on_hardware_device_state_change("207l-switch", false);
        assert_eq!(selection(&home, "207l-switch"), Some(1));
        assert_eq!(home.parameters().get("/lights/work/brightness"), Some(1.0));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(commands.recv().await, Some(true));

        home.on_hardware_device_state_change("207l-switch", true);
        assert_eq!(selection(&home, "207l-switch"), Some(1));
        match home.devices().get("207l-switch").unwrap().behavior() {
            Some(SwitchBehavior::OneButton(switch)) => {
                let state = switch.state();
                assert_eq!(state.transitioning_to(), None);
                assert!(!state.is_window_open());
            }
            _ => unreachable!(),
        }

        home.on_hardware_device_state_change("207l-switch", false);
        assert_eq!(selection(&home, "207l-switch"), None);
        assert_eq!(home.parameters().get("/lights/work/brightness"), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_corrective_write_clears_transition() {
        let (home, _events) = home(vec![outlet("207l-switch", Some(one_button_switch()))], rafter_scenes());
        let (plug, mut commands) = FakePlug::failing();
        home.devices().get("207l-switch").unwrap().bind_plug(plug);

        home.on_hardware_device_state_change("207l-switch", true);
        home.on_hardware_device_state_change("207l-switch", false);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(commands.recv().await, Some(true));
        tokio::time::sleep(Duration::from_millis(10)).await;

        match home.devices().get("207l-switch").unwrap().behavior() {
            Some(SwitchBehavior::OneButton(switch)) => assert_eq!(switch.state().transitioning_to(), None),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_full_state_lists_parameters_then_known_devices() {
        let (home, _events) = home(vec![outlet("lamp", None), outlet("bed", None)], vec![]);
        home.adopt_hardware_state(home.devices().get("bed").unwrap(), true);

        let state = home.full_state();

        assert_eq!(state.len(), 13);
        assert_eq!(state.last(), Some(&StateChange::device("bed", true)));
    }
}
