use std::collections::HashMap;

use indexmap::IndexMap;

/// Binds a voice intent, optionally narrowed by slot values, to a scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRule {
    pub intent: String,
    pub slots: IndexMap<String, String>,
}

impl VoiceRule {
    /// A rule entry names exactly one intent. Anything else is a broken table.
    pub fn from_entry(scene: &str, entry: IndexMap<String, IndexMap<String, String>>) -> anyhow::Result<Self> {
        let found = entry.keys().cloned().collect::<Vec<_>>();
        let mut intents = entry.into_iter();

        match (intents.next(), intents.next()) {
            (Some((intent, slots)), None) => Ok(Self { intent, slots }),
            _ => anyhow::bail!("Voice rule of scene {} must name exactly one intent, found {:?}", scene, found),
        }
    }

    pub fn matches(&self, intent: &str, slots: &HashMap<String, String>) -> bool {
        self.intent == intent
            && self
                .slots
                .iter()
                .all(|(name, value)| slots.get(name).is_some_and(|v| v == value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(intent: &str, slots: &[(&str, &str)]) -> IndexMap<String, IndexMap<String, String>> {
        let slots = slots.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        IndexMap::from([(intent.to_string(), slots)])
    }

    #[test]
    fn test_rule_with_two_intents_is_rejected() {
        let mut broken = entry("LightsOnIntent", &[]);
        broken.extend(entry("LightsOffIntent", &[]));

        assert!(VoiceRule::from_entry("lamps-on", broken).is_err());
        assert!(VoiceRule::from_entry("lamps-on", IndexMap::new()).is_err());
    }

    #[test]
    fn test_all_required_slots_must_match() {
        let rule = VoiceRule::from_entry("pattern", entry("ChooseLightsIntent", &[("lights", "pattern")])).unwrap();
        let slots = HashMap::from([("lights".to_string(), "pattern".to_string())]);
        let other = HashMap::from([("lights".to_string(), "work".to_string())]);

        assert!(rule.matches("ChooseLightsIntent", &slots));
        assert!(!rule.matches("ChooseLightsIntent", &other));
        assert!(!rule.matches("ChooseLightsIntent", &HashMap::new()));
        assert!(!rule.matches("OtherIntent", &slots));
    }
}
