pub mod resilience;

use derive_more::Display;

/// A value change observers (touch controllers) should see, keyed by its touch-protocol path.
#[derive(Debug, Clone, PartialEq, Display)]
#[display("{path}={value}")]
pub struct StateChange {
    pub path: String,
    pub value: f64,
}

impl StateChange {
    pub fn new(path: impl Into<String>, value: f64) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    pub fn device(name: &str, on: bool) -> Self {
        Self::new(device_path(name), if on { 1.0 } else { 0.0 })
    }
}

pub fn device_path(name: &str) -> String {
    format!("/dev/{}", name)
}
