use std::net::SocketAddr;

use sacn::source::SacnSource;

/// Transport for one universe worth of channel data.
pub trait PacketSink {
    fn send_packet(&mut self, universe: u16, channels: &[u8]) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Unicast E1.31 sender.
pub struct SacnSink {
    source: SacnSource,
    destination: SocketAddr,
    priority: u8,
    data: Vec<u8>,
}

impl SacnSink {
    pub fn new(
        source_name: &str,
        destination: SocketAddr,
        priority: u8,
        universes: impl IntoIterator<Item = u16>,
    ) -> anyhow::Result<Self> {
        let local = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut source = SacnSource::with_ip(source_name, local)
            .map_err(|e| anyhow::anyhow!("Error creating sACN source {}: {:?}", source_name, e))?;

        for universe in universes {
            source
                .register_universe(universe)
                .map_err(|e| anyhow::anyhow!("Error registering sACN universe {}: {:?}", universe, e))?;
        }

        tracing::info!("Sending sACN as {} to {}", source_name, destination);

        Ok(Self {
            source,
            destination,
            priority,
            data: vec![],
        })
    }
}

impl PacketSink for SacnSink {
    fn send_packet(&mut self, universe: u16, channels: &[u8]) -> impl Future<Output = anyhow::Result<()>> + Send {
        // DMX start code
        self.data.clear();
        self.data.push(0);
        self.data.extend_from_slice(channels);

        let result = self
            .source
            .send(&[universe], &self.data, Some(self.priority), Some(self.destination), None)
            .map_err(|e| anyhow::anyhow!("Error sending sACN universe {}: {:?}", universe, e));

        std::future::ready(result)
    }
}
