use std::ops::Range;

/// Highest universe number E1.31 allows.
const MAX_UNIVERSE: u16 = 63999;
const MAX_CHANNELS_PER_UNIVERSE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub universe: u16,
    pub channels: Range<usize>,
}

/// Fixed split of the frame buffer into consecutive universes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLayout {
    packets: Vec<Packet>,
}

impl PacketLayout {
    pub fn new(total_channels: usize, channels_per_universe: usize, start_universe: u16) -> anyhow::Result<Self> {
        if channels_per_universe == 0 || channels_per_universe > MAX_CHANNELS_PER_UNIVERSE {
            anyhow::bail!(
                "Channels per universe must be between 1 and {}, got {}",
                MAX_CHANNELS_PER_UNIVERSE,
                channels_per_universe
            );
        }

        let mut packets = vec![];
        let mut universe = start_universe;

        for start in (0..total_channels).step_by(channels_per_universe) {
            if universe == 0 || universe > MAX_UNIVERSE {
                anyhow::bail!("Universe {} is out of range", universe);
            }

            packets.push(Packet {
                universe,
                channels: start..(start + channels_per_universe).min(total_channels),
            });
            universe += 1;
        }

        Ok(Self { packets })
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn universes(&self) -> impl Iterator<Item = u16> + '_ {
        self.packets.iter().map(|p| p.universe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_split_into_consecutive_universes() {
        let layout = PacketLayout::new(1200, 510, 1).unwrap();

        assert_eq!(
            layout.packets(),
            &[
                Packet {
                    universe: 1,
                    channels: 0..510
                },
                Packet {
                    universe: 2,
                    channels: 510..1020
                },
                Packet {
                    universe: 3,
                    channels: 1020..1200
                },
            ]
        );
    }

    #[test]
    fn test_full_rig_layout() {
        let layout = PacketLayout::new(8 * 2 * 180 * 4, 510, 1).unwrap();

        assert_eq!(layout.packets().len(), 23);
        assert_eq!(layout.packets().last().unwrap().channels.len(), 11520 - 22 * 510);
    }

    #[test]
    fn test_invalid_universes_are_rejected() {
        assert!(PacketLayout::new(1024, 600, 1).is_err());
        assert!(PacketLayout::new(1024, 510, 0).is_err());
        assert!(PacketLayout::new(1024, 512, 63999).is_err());
    }
}
