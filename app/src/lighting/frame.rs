use serde::Deserialize;

use crate::parameter::{Layer, PATTERN_SATURATION, PATTERN_SPEED, PATTERN_WIDTH, ParameterStore, Side};

pub const SIDES_PER_ZONE: usize = 2;
pub const CHANNELS_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigGeometry {
    pub zones: usize,
    pub pixels_per_side: usize,
    /// Number of pixels the pattern width is spread over.
    pub hue_span_pixels: f64,
}

impl RigGeometry {
    pub fn channels(&self) -> usize {
        self.zones * SIDES_PER_ZONE * self.pixels_per_side * CHANNELS_PER_PIXEL
    }
}

/// Pixels `start..end` of one zone side that are forced dark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MaskRange {
    pub zone: usize,
    pub side: Side,
    pub start: usize,
    pub end: usize,
}

impl MaskRange {
    fn covers(&self, zone: usize, side: usize, pixel: usize) -> bool {
        self.zone == zone && self.side.index() == side && (self.start..self.end).contains(&pixel)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayerParameters {
    pub brightness: f64,
    pub sides: [bool; SIDES_PER_ZONE],
}

impl LayerParameters {
    fn read(store: &ParameterStore, layer: Layer) -> Self {
        let mut sides = [false; SIDES_PER_ZONE];
        for side in Side::ALL {
            sides[side.index()] = store.is_enabled(&layer.side_path(side));
        }

        Self {
            brightness: store.value(&layer.brightness_path()),
            sides,
        }
    }
}

/// Everything a frame depends on, read once per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightingParameters {
    pub speed: f64,
    pub width: f64,
    pub saturation: f64,
    pub pattern: LayerParameters,
    pub warm: LayerParameters,
    pub work: LayerParameters,
}

impl LightingParameters {
    pub fn read(store: &ParameterStore) -> Self {
        Self {
            speed: store.value(PATTERN_SPEED),
            width: store.value(PATTERN_WIDTH),
            saturation: store.value(PATTERN_SATURATION),
            pattern: LayerParameters::read(store, Layer::Pattern),
            warm: LayerParameters::read(store, Layer::Warm),
            work: LayerParameters::read(store, Layer::Work),
        }
    }
}

pub struct FrameComposer {
    geometry: RigGeometry,
    mask: Vec<MaskRange>,
}

impl FrameComposer {
    pub fn new(geometry: RigGeometry, mask: Vec<MaskRange>) -> Self {
        Self { geometry, mask }
    }

    pub fn geometry(&self) -> &RigGeometry {
        &self.geometry
    }

    /// Renders all pixels into `buffer` (G, R, B, W per pixel) and returns whether any layer
    /// was active on any pixel.
    pub fn compose(&self, params: &LightingParameters, hue_center: f64, buffer: &mut [u8]) -> bool {
        let RigGeometry {
            zones,
            pixels_per_side,
            hue_span_pixels,
        } = self.geometry;

        let hue_start = hue_center - params.width / 2.0 + 1.0;
        let hue_step = params.width / hue_span_pixels;
        let mut any_on = false;

        let pixels = buffer.chunks_exact_mut(CHANNELS_PER_PIXEL);
        for (index, channels) in pixels.enumerate() {
            let pixel = index % pixels_per_side;
            let side = (index / pixels_per_side) % SIDES_PER_ZONE;
            let zone = index / (pixels_per_side * SIDES_PER_ZONE);

            let mut rgbw = [0.0; 4];

            let pattern_on = params.pattern.sides[side];
            if pattern_on {
                let hue = (hue_start + pixel as f64 * hue_step + zone as f64 / zones as f64).rem_euclid(1.0);
                let rgb = hsv_to_rgb(hue, params.saturation, params.pattern.brightness);
                for (channel, value) in rgbw.iter_mut().zip(rgb) {
                    *channel += value;
                }
            }

            let warm_on = params.warm.sides[side];
            if warm_on {
                rgbw[3] += params.warm.brightness * 255.0;
            }

            let work_on = params.work.sides[side];
            if work_on {
                let amount = params.work.brightness * 255.0;
                for channel in &mut rgbw[..3] {
                    *channel += amount;
                }
            }

            any_on |= pattern_on || warm_on || work_on;

            if self.mask.iter().any(|range| range.covers(zone, side, pixel)) {
                rgbw = [0.0; 4];
            }

            let [r, g, b, w] = rgbw.map(to_channel);
            channels.copy_from_slice(&[g, r, b, w]);
        }

        any_on
    }
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Hue, saturation and value in `0..=1` to RGB in `0..=255`.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [f64; 3] {
    let s = s.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);
    let h = h.rem_euclid(1.0) * 6.0;
    let h_i = h.floor();
    let f = h - h_i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match h_i as i32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    [r * 255.0, g * 255.0, b * 255.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> RigGeometry {
        RigGeometry {
            zones: 2,
            pixels_per_side: 4,
            hue_span_pixels: 8.0,
        }
    }

    fn params() -> LightingParameters {
        LightingParameters {
            speed: 0.3,
            width: 0.5,
            saturation: 1.0,
            ..Default::default()
        }
    }

    fn pixel(buffer: &[u8], zone: usize, side: usize, pixel: usize) -> [u8; 4] {
        let geometry = geometry();
        let index = (zone * SIDES_PER_ZONE + side) * geometry.pixels_per_side + pixel;
        let start = index * CHANNELS_PER_PIXEL;
        buffer[start..start + CHANNELS_PER_PIXEL].try_into().unwrap()
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [255.0, 0.0, 0.0]);
        assert_eq!(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0).map(f64::round), [0.0, 255.0, 0.0]);
        assert_eq!(hsv_to_rgb(0.5, 0.0, 0.5), [127.5, 127.5, 127.5]);
    }

    #[test]
    fn test_dark_frame_reports_nothing_on() {
        let composer = FrameComposer::new(geometry(), vec![]);
        let mut buffer = vec![7; geometry().channels()];

        let any_on = composer.compose(&params(), 0.0, &mut buffer);

        assert!(!any_on);
        assert!(buffer.iter().all(|c| *c == 0));
    }

    #[test]
    fn test_layers_add_and_clamp_in_grbw_order() {
        let composer = FrameComposer::new(geometry(), vec![]);
        let mut buffer = vec![0; geometry().channels()];
        let params = LightingParameters {
            warm: LayerParameters {
                brightness: 0.5,
                sides: [true, false],
            },
            work: LayerParameters {
                brightness: 0.2,
                sides: [true, true],
            },
            pattern: LayerParameters {
                brightness: 1.0,
                sides: [false, true],
            },
            ..params()
        };

        assert!(composer.compose(&params, 0.0, &mut buffer));

        assert_eq!(pixel(&buffer, 0, 0, 0), [51, 51, 51, 128]);
        let top = pixel(&buffer, 1, 1, 3);
        assert_eq!(top[3], 0);
        assert!(top[..3].iter().any(|c| *c == 255));
        assert!(top[..3].iter().all(|c| *c >= 51));
    }

    #[test]
    fn test_hue_follows_position_and_zone() {
        let composer = FrameComposer::new(geometry(), vec![]);
        let mut buffer = vec![0; geometry().channels()];
        let params = LightingParameters {
            width: 0.0,
            pattern: LayerParameters {
                brightness: 1.0,
                sides: [true, true],
            },
            ..params()
        };

        composer.compose(&params, 0.0, &mut buffer);

        assert_eq!(pixel(&buffer, 0, 0, 0), [0, 255, 0, 0]);
        assert_eq!(pixel(&buffer, 1, 0, 0), [255, 0, 255, 0]);
    }

    #[test]
    fn test_masked_pixels_stay_dark() {
        let mask = vec![MaskRange {
            zone: 1,
            side: Side::Top,
            start: 2,
            end: 4,
        }];
        let composer = FrameComposer::new(geometry(), mask);
        let mut buffer = vec![0; geometry().channels()];
        let params = LightingParameters {
            warm: LayerParameters {
                brightness: 1.0,
                sides: [true, true],
            },
            ..params()
        };

        composer.compose(&params, 0.0, &mut buffer);

        assert_eq!(pixel(&buffer, 1, 1, 1), [0, 0, 0, 255]);
        assert_eq!(pixel(&buffer, 1, 1, 2), [0, 0, 0, 0]);
        assert_eq!(pixel(&buffer, 1, 1, 3), [0, 0, 0, 0]);
        assert_eq!(pixel(&buffer, 0, 1, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn test_compose_is_idempotent() {
        let composer = FrameComposer::new(geometry(), vec![]);
        let params = LightingParameters {
            pattern: LayerParameters {
                brightness: 0.8,
                sides: [true, true],
            },
            ..params()
        };
        let mut first = vec![0; geometry().channels()];
        let mut second = vec![0; geometry().channels()];

        composer.compose(&params, 0.37, &mut first);
        composer.compose(&params, 0.37, &mut second);

        assert_eq!(first, second);
    }
}
