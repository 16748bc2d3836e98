use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use infrastructure::{HttpServerConfig, MonitoringConfig};
use serde::Deserialize;

use crate::adapter::harmony::HarmonyConfig;
use crate::adapter::kasa::KasaConfig;
use crate::adapter::osc::OscConfig;
use crate::lighting::LightingConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub home_table: PathBuf,
    pub monitoring: MonitoringConfig,
    pub http_server: HttpServerConfig,
    pub osc: OscConfig,
    pub lighting: LightingConfig,
    #[serde(default)]
    pub kasa: KasaConfig,
    pub harmony: Option<HarmonyConfig>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml"))
            .add_source(Environment::with_prefix("SCENEHUB").separator("__"));

        let s = builder.build()?;
        s.try_deserialize()
    }
}
