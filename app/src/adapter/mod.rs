pub mod harmony;
pub mod kasa;
pub mod osc;
pub mod sisbot;
pub mod voice;
