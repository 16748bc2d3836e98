mod voice;

use std::collections::HashMap;

use indexmap::IndexMap;

pub use voice::VoiceRule;

/// Scene key carrying voice rules instead of a target.
pub const VOICE_KEY: &str = "_voice";

#[derive(Debug, Clone, PartialEq)]
pub enum SceneValue {
    Switch(bool),
    Level(f64),
    Voice(Vec<VoiceRule>),
}

impl SceneValue {
    pub fn as_level(&self) -> Option<f64> {
        match self {
            SceneValue::Switch(on) => Some(if *on { 1.0 } else { 0.0 }),
            SceneValue::Level(value) => Some(*value),
            SceneValue::Voice(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub name: String,
    pub targets: Vec<(String, SceneValue)>,
}

impl Scene {
    pub fn voice_rules(&self) -> impl Iterator<Item = &VoiceRule> {
        self.targets
            .iter()
            .filter_map(|(_, value)| match value {
                SceneValue::Voice(rules) => Some(rules),
                _ => None,
            })
            .flatten()
    }
}

/// Outcome of one scene entry, in scene order.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneStep {
    Device { name: String, on: bool },
    Parameter { path: String, value: f64 },
    Metadata,
    Unknown { key: String },
}

#[derive(Debug, Default)]
pub struct SceneBook {
    scenes: IndexMap<String, Scene>,
}

impl SceneBook {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes: scenes.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Scene> {
        self.scenes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    /// First scene, in table order, with a rule matching the intent.
    pub fn match_voice_intent(&self, intent: &str, slots: &HashMap<String, String>) -> Option<&str> {
        self.scenes
            .values()
            .find(|scene| scene.voice_rules().any(|rule| rule.matches(intent, slots)))
            .map(|scene| scene.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(intent: &str, slots: &[(&str, &str)]) -> VoiceRule {
        VoiceRule {
            intent: intent.to_string(),
            slots: slots.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn scene(name: &str, rules: Vec<VoiceRule>) -> Scene {
        Scene {
            name: name.to_string(),
            targets: vec![
                ("lamp".to_string(), SceneValue::Switch(true)),
                (VOICE_KEY.to_string(), SceneValue::Voice(rules)),
            ],
        }
    }

    #[test]
    fn test_first_matching_scene_wins() {
        let book = SceneBook::new(vec![
            scene("lamps-off", vec![rule("TurnOffIntent", &[])]),
            scene("pattern", vec![rule("ChooseIntent", &[("lights", "pattern")])]),
            scene("pattern-again", vec![rule("ChooseIntent", &[("lights", "pattern")])]),
        ]);
        let slots = HashMap::from([("lights".to_string(), "pattern".to_string())]);

        assert_eq!(book.match_voice_intent("ChooseIntent", &slots), Some("pattern"));
        assert_eq!(book.match_voice_intent("TurnOffIntent", &HashMap::new()), Some("lamps-off"));
        assert_eq!(book.match_voice_intent("DanceIntent", &HashMap::new()), None);
    }

    #[test]
    fn test_scene_without_rules_never_matches() {
        let book = SceneBook::new(vec![Scene {
            name: "bright".to_string(),
            targets: vec![("/lights/work/brightness".to_string(), SceneValue::Level(1.0))],
        }]);

        assert_eq!(book.match_voice_intent("BrightIntent", &HashMap::new()), None);
        assert!(book.contains("bright"));
    }
}
