mod frame;
mod packet;
mod sink;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use infrastructure::meter;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};

use crate::home::Home;

pub use frame::{FrameComposer, LayerParameters, LightingParameters, MaskRange, RigGeometry};
pub use packet::{Packet, PacketLayout};
pub use sink::{PacketSink, SacnSink};

#[derive(Debug, Clone, Deserialize)]
pub struct LightingConfig {
    pub peer: IpAddr,
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub zones: usize,
    pub pixels_per_side: usize,
    #[serde(default = "default_channels_per_universe")]
    pub channels_per_universe: usize,
    #[serde(default = "default_start_universe")]
    pub start_universe: u16,
    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: u32,
    #[serde(default = "default_hue_span_pixels")]
    pub hue_span_pixels: f64,
    #[serde(default)]
    pub mask: Vec<MaskRange>,
}

fn default_peer_port() -> u16 {
    5568
}

fn default_source_name() -> String {
    "lights".to_string()
}

fn default_priority() -> u8 {
    100
}

fn default_channels_per_universe() -> usize {
    510
}

fn default_start_universe() -> u16 {
    1
}

fn default_frames_per_second() -> u32 {
    40
}

fn default_hue_span_pixels() -> f64 {
    240.0
}

impl LightingConfig {
    pub fn geometry(&self) -> RigGeometry {
        RigGeometry {
            zones: self.zones,
            pixels_per_side: self.pixels_per_side,
            hue_span_pixels: self.hue_span_pixels,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frames_per_second.max(1) as f64)
    }

    pub fn new_runner(&self, home: Home) -> anyhow::Result<LightingRunner<SacnSink>> {
        let geometry = self.geometry();
        let layout = PacketLayout::new(geometry.channels(), self.channels_per_universe, self.start_universe)?;
        let sink = SacnSink::new(
            &self.source_name,
            SocketAddr::new(self.peer, self.peer_port),
            self.priority,
            layout.universes(),
        )?;

        let engine = LightingEngine::new(FrameComposer::new(geometry, self.mask.clone()), layout, sink);
        Ok(LightingRunner::new(engine, home, self.frame_interval()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    /// Dark frame sent before pausing.
    SentFinal,
    Paused,
}

pub struct LightingEngine<S> {
    composer: FrameComposer,
    layout: PacketLayout,
    buffer: Vec<u8>,
    hue_center: f64,
    last_frame: Option<Instant>,
    paused: bool,
    sink: S,
}

impl<S: PacketSink> LightingEngine<S> {
    pub fn new(composer: FrameComposer, layout: PacketLayout, sink: S) -> Self {
        let buffer = vec![0; composer.geometry().channels()];

        Self {
            composer,
            layout,
            buffer,
            hue_center: 0.0,
            last_frame: None,
            paused: false,
            sink,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn hue_center(&self) -> f64 {
        self.hue_center
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub async fn render_frame(&mut self, params: &LightingParameters, now: Instant) -> FrameOutcome {
        let elapsed = self
            .last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or_default();
        self.last_frame = Some(now);
        self.hue_center = (self.hue_center + elapsed * params.speed / 4.0).rem_euclid(1.0);

        let any_on = self.composer.compose(params, self.hue_center, &mut self.buffer);

        let outcome = match (any_on, self.paused) {
            (true, paused) => {
                if paused {
                    tracing::info!("Resuming LED rendering");
                    self.paused = false;
                    meter::set("lighting_paused", 0.0, &[]);
                }
                FrameOutcome::Sent
            }
            (false, true) => return FrameOutcome::Paused,
            (false, false) => {
                tracing::info!("Pausing LED rendering after this frame");
                self.paused = true;
                meter::set("lighting_paused", 1.0, &[]);
                FrameOutcome::SentFinal
            }
        };

        self.send_buffer().await;
        outcome
    }

    async fn send_buffer(&mut self) {
        for packet in self.layout.packets() {
            let channels = &self.buffer[packet.channels.clone()];
            if let Err(e) = self.sink.send_packet(packet.universe, channels).await {
                tracing::warn!("Skipping packet for universe {}: {:?}", packet.universe, e);
                meter::increment("lighting_packet_failed", &[]);
            }
        }

        meter::increment("lighting_frame_sent", &[]);
    }
}

/// Renders frames on a fixed grid and sleeps while everything is dark.
pub struct LightingRunner<S> {
    engine: LightingEngine<S>,
    home: Home,
    frame_interval: Duration,
}

impl<S: PacketSink> LightingRunner<S> {
    pub fn new(engine: LightingEngine<S>, home: Home, frame_interval: Duration) -> Self {
        Self {
            engine,
            home,
            frame_interval,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Rendering lights every {:?}", self.frame_interval);

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let params = LightingParameters::read(self.home.parameters());
            if self.engine.render_frame(&params, Instant::now()).await == FrameOutcome::Paused {
                self.home.parameters().changed().await;
            }
        }
    }
}
