use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::adapter::sisbot::SisbotTable;
use crate::device::behavior::{OneButtonSwitch, SwitchBehavior, ToggleSwitch};
use crate::device::{Device, DeviceControl, IrStep};
use crate::scene::{Scene, SceneBook, SceneValue, VOICE_KEY, VoiceRule};

/// Static description of the home: its devices and scenes.
#[derive(Debug)]
pub struct HomeTable {
    pub devices: Vec<Device>,
    pub scenes: SceneBook,
}

#[derive(Debug, Deserialize)]
struct HomeTableConfig {
    #[serde(default)]
    devices: Vec<DeviceConfig>,
    #[serde(default)]
    scenes: IndexMap<String, IndexMap<String, SceneValueConfig>>,
}

#[derive(Debug, Deserialize)]
struct DeviceConfig {
    name: String,
    #[serde(flatten)]
    kind: DeviceKindConfig,
    switch_behavior: Option<SwitchBehaviorConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DeviceKindConfig {
    SwitchedOutlet {
        host: String,
    },
    IrHubTarget {
        device_id: String,
        #[serde(default)]
        on_actions: Vec<IrStepConfig>,
        #[serde(default)]
        off_actions: Vec<IrStepConfig>,
    },
    CustomFunction {
        function: FunctionConfig,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IrStepConfig {
    Pause(u64),
    Action(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FunctionConfig {
    Sisbot { url: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SwitchBehaviorConfig {
    ToggleSwitch {
        on_scene: String,
        off_scene: String,
    },
    OneButtonSceneSwitch {
        scene_list: Vec<String>,
        off_scene: String,
        selection_timeout_ms: u64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SceneValueConfig {
    Switch(bool),
    Level(f64),
    Voice(Vec<IndexMap<String, IndexMap<String, String>>>),
}

impl HomeTable {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Error reading home table {:?}", path))?;
        Self::parse(&text).with_context(|| format!("Error loading home table {:?}", path))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: HomeTableConfig = toml::from_str(text)?;

        let scenes = config
            .scenes
            .into_iter()
            .map(|(name, targets)| to_scene(name, targets))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let scenes = SceneBook::new(scenes);

        let mut names = HashSet::new();
        let mut devices = vec![];

        for device in config.devices {
            if !names.insert(device.name.clone()) {
                anyhow::bail!("Device {} is defined more than once", device.name);
            }
            devices.push(to_device(device, &scenes)?);
        }

        tracing::info!("Loaded {} devices and {} scenes", devices.len(), scenes.len());

        Ok(Self { devices, scenes })
    }
}

fn to_scene(name: String, targets: IndexMap<String, SceneValueConfig>) -> anyhow::Result<Scene> {
    let mut resolved = vec![];

    for (key, value) in targets {
        let value = match value {
            SceneValueConfig::Switch(on) => SceneValue::Switch(on),
            SceneValueConfig::Level(level) => SceneValue::Level(level),
            SceneValueConfig::Voice(entries) if key == VOICE_KEY => SceneValue::Voice(
                entries
                    .into_iter()
                    .map(|entry| VoiceRule::from_entry(&name, entry))
                    .collect::<anyhow::Result<_>>()?,
            ),
            SceneValueConfig::Voice(_) => {
                anyhow::bail!("Key {} of scene {} must be a boolean or a number", key, name)
            }
        };
        resolved.push((key, value));
    }

    Ok(Scene {
        name,
        targets: resolved,
    })
}

fn to_device(config: DeviceConfig, scenes: &SceneBook) -> anyhow::Result<Device> {
    let control = match config.kind {
        DeviceKindConfig::SwitchedOutlet { host } => DeviceControl::SwitchedOutlet { host },
        DeviceKindConfig::IrHubTarget {
            device_id,
            on_actions,
            off_actions,
        } => DeviceControl::IrHubTarget {
            device_id,
            on_actions: on_actions.into_iter().map(IrStep::from).collect(),
            off_actions: off_actions.into_iter().map(IrStep::from).collect(),
        },
        DeviceKindConfig::CustomFunction {
            function: FunctionConfig::Sisbot { url },
        } => DeviceControl::CustomFunction(Arc::new(SisbotTable::new(url)?)),
    };

    let behavior = config
        .switch_behavior
        .map(|behavior| to_behavior(&config.name, behavior))
        .transpose()?;

    if let Some(behavior) = &behavior {
        for scene in referenced_scenes(behavior) {
            if !scenes.contains(scene) {
                tracing::warn!("Switch of {} refers to unknown scene {}", config.name, scene);
            }
        }
    }

    Ok(Device::new(config.name, control, behavior))
}

fn to_behavior(device: &str, config: SwitchBehaviorConfig) -> anyhow::Result<SwitchBehavior> {
    Ok(match config {
        SwitchBehaviorConfig::ToggleSwitch { on_scene, off_scene } => {
            SwitchBehavior::Toggle(ToggleSwitch { on_scene, off_scene })
        }
        SwitchBehaviorConfig::OneButtonSceneSwitch {
            scene_list,
            off_scene,
            selection_timeout_ms,
        } => {
            if scene_list.is_empty() {
                anyhow::bail!("One-button switch of {} needs at least one scene", device);
            }
            SwitchBehavior::OneButton(OneButtonSwitch::new(
                scene_list,
                off_scene,
                Duration::from_millis(selection_timeout_ms),
            ))
        }
    })
}

fn referenced_scenes(behavior: &SwitchBehavior) -> Vec<&str> {
    match behavior {
        SwitchBehavior::Toggle(toggle) => vec![toggle.on_scene.as_str(), toggle.off_scene.as_str()],
        SwitchBehavior::OneButton(switch) => switch
            .scene_list()
            .iter()
            .map(String::as_str)
            .chain([switch.scene_for(None)])
            .collect(),
    }
}

impl From<IrStepConfig> for IrStep {
    fn from(config: IrStepConfig) -> Self {
        match config {
            IrStepConfig::Pause(ms) => IrStep::Pause(Duration::from_millis(ms)),
            IrStepConfig::Action(action) => IrStep::Action(action),
        }
    }
}
