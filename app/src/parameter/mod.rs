use std::sync::{Mutex, MutexGuard, PoisonError};

use derive_more::Display;
use indexmap::IndexMap;
use infrastructure::EventEmitter;
use serde::Deserialize;
use tokio::sync::Notify;

use crate::core::StateChange;

pub const PATTERN_SPEED: &str = "/pattern/speed";
pub const PATTERN_WIDTH: &str = "/pattern/width";
pub const PATTERN_SATURATION: &str = "/pattern/saturation";

/// One of the additive light layers every rig side can enable independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Layer {
    #[display("pattern")]
    Pattern,
    #[display("warm")]
    Warm,
    #[display("work")]
    Work,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Pattern, Layer::Warm, Layer::Work];

    pub fn brightness_path(self) -> String {
        format!("/lights/{}/brightness", self)
    }

    pub fn side_path(self, side: Side) -> String {
        format!("/lights/{}/{}", self, side)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[display("bottom")]
    Bottom,
    #[display("top")]
    Top,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Bottom, Side::Top];

    pub fn index(self) -> usize {
        match self {
            Side::Bottom => 0,
            Side::Top => 1,
        }
    }
}

fn default_values() -> IndexMap<String, f64> {
    let mut values = IndexMap::new();

    for layer in Layer::ALL {
        values.insert(layer.brightness_path(), 0.0);
        for side in Side::ALL {
            values.insert(layer.side_path(side), 0.0);
        }
    }

    values.insert(PATTERN_SPEED.to_string(), 0.3);
    values.insert(PATTERN_WIDTH.to_string(), 0.5);
    values.insert(PATTERN_SATURATION.to_string(), 1.0);

    values
}

/// Flat table of the lighting settings. Every write is broadcast and wakes the render loop.
pub struct ParameterStore {
    values: Mutex<IndexMap<String, f64>>,
    events: EventEmitter<StateChange>,
    changed: Notify,
}

impl ParameterStore {
    pub fn new(events: EventEmitter<StateChange>) -> Self {
        Self {
            values: Mutex::new(default_values()),
            events,
            changed: Notify::new(),
        }
    }

    fn values(&self) -> MutexGuard<'_, IndexMap<String, f64>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.values().contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<f64> {
        self.values().get(path).copied()
    }

    /// Current value of a path known to exist, zero otherwise.
    pub fn value(&self, path: &str) -> f64 {
        self.get(path).unwrap_or_default()
    }

    pub fn is_enabled(&self, path: &str) -> bool {
        self.value(path) != 0.0
    }

    pub fn snapshot(&self) -> Vec<(String, f64)> {
        self.values().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Writes a known parameter. Returns false (and changes nothing) for unknown paths.
    ///
    /// Raising a layer's brightness above zero while none of its sides is enabled enables both
    /// sides, so a brightness change from the all-off state produces visible light.
    pub fn set(&self, path: &str, value: f64) -> bool {
        if !self.contains(path) {
            tracing::warn!("No such parameter {}", path);
            return false;
        }

        self.write(path, value);

        if value > 0.0 {
            if let Some(layer) = Layer::ALL.into_iter().find(|l| l.brightness_path() == path) {
                let any_side_enabled = Side::ALL
                    .into_iter()
                    .any(|side| self.is_enabled(&layer.side_path(side)));

                if !any_side_enabled {
                    tracing::debug!("Enabling all sides of {} layer", layer);
                    for side in Side::ALL {
                        self.write(&layer.side_path(side), 1.0);
                    }
                }
            }
        }

        self.changed.notify_one();
        true
    }

    fn write(&self, path: &str, value: f64) {
        if let Some(current) = self.values().get_mut(path) {
            *current = value;
        }
        self.events.send(StateChange::new(path, value));
    }

    /// Resolves once a parameter was written after the last call.
    pub async fn changed(&self) {
        self.changed.notified().await
    }
}

#[cfg(test)]
mod tests {
    use infrastructure::{EventBus, EventListener};

    use super::*;

    fn store() -> (ParameterStore, EventListener<StateChange>) {
        let bus = EventBus::new(64);
        let listener = bus.subscribe();
        (ParameterStore::new(bus.emitter()), listener)
    }

    fn drain(listener: &mut EventListener<StateChange>) -> Vec<StateChange> {
        std::iter::from_fn(|| listener.try_recv()).collect()
    }

    #[test]
    fn test_unknown_path_is_rejected() {
        let (params, mut events) = store();

        assert!(!params.set("/lights/disco/brightness", 1.0));

        assert!(!params.contains("/lights/disco/brightness"));
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_known_path_is_written_and_broadcast() {
        let (params, mut events) = store();

        assert!(params.set(PATTERN_SPEED, 0.75));

        assert_eq!(params.get(PATTERN_SPEED), Some(0.75));
        assert_eq!(drain(&mut events), vec![StateChange::new(PATTERN_SPEED, 0.75)]);
    }

    #[test]
    fn test_brightness_from_dark_enables_both_sides() {
        let (params, mut events) = store();

        params.set("/lights/warm/brightness", 0.25);

        assert_eq!(
            drain(&mut events),
            vec![
                StateChange::new("/lights/warm/brightness", 0.25),
                StateChange::new("/lights/warm/bottom", 1.0),
                StateChange::new("/lights/warm/top", 1.0),
            ]
        );
        assert!(params.is_enabled("/lights/warm/top"));
        assert!(params.is_enabled("/lights/warm/bottom"));
    }

    #[test]
    fn test_brightness_with_one_side_enabled_forces_nothing() {
        let (params, mut events) = store();
        params.set("/lights/work/top", 1.0);
        drain(&mut events);

        params.set("/lights/work/brightness", 0.5);

        assert_eq!(drain(&mut events), vec![StateChange::new("/lights/work/brightness", 0.5)]);
        assert!(!params.is_enabled("/lights/work/bottom"));
    }

    #[test]
    fn test_brightness_to_zero_keeps_sides() {
        let (params, mut events) = store();
        params.set("/lights/pattern/brightness", 0.5);
        drain(&mut events);

        params.set("/lights/pattern/brightness", 0.0);

        assert_eq!(drain(&mut events), vec![StateChange::new("/lights/pattern/brightness", 0.0)]);
        assert!(params.is_enabled("/lights/pattern/top"));
        assert!(params.is_enabled("/lights/pattern/bottom"));
    }

    #[test]
    fn test_snapshot_contains_all_defaults() {
        let (params, _events) = store();

        let snapshot = params.snapshot();

        assert_eq!(snapshot.len(), 12);
        assert!(snapshot.contains(&(PATTERN_SATURATION.to_string(), 1.0)));
    }

    #[tokio::test]
    async fn test_write_wakes_waiter() {
        let (params, _events) = store();

        params.set(PATTERN_WIDTH, 0.1);

        tokio::time::timeout(std::time::Duration::from_secs(1), params.changed())
            .await
            .expect("write should notify");
    }
}
