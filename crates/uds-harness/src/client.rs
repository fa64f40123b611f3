//! Client adapter: a [`UdsClient`] on its own bus port
//!
//! Dereferences to [`UdsClient`], so test bodies call services directly:
//! `ctx.client.read_did(0x0003).await?`.

use std::ops::Deref;
use std::sync::Arc;

use sim_can::SimBus;
use uds_client::{ClientConfig, SimCanAdapter, TransportAdapter, UdsClient};

use crate::error::HarnessResult;

pub struct ClientAdapter {
    client: UdsClient,
    transport: Arc<SimCanAdapter>,
}

impl ClientAdapter {
    /// Attach to `bus`, start the ISO-TP transport loop and build the client
    pub fn open(bus: &SimBus, config: &ClientConfig) -> HarnessResult<Self> {
        let link = config.link_config()?;
        let transport = Arc::new(SimCanAdapter::new(bus, link, config.response_timing())?);
        let shared: Arc<dyn TransportAdapter> = transport.clone();
        let client = UdsClient::new(shared, config.clone())?;

        tracing::debug!(
            channel = bus.channel(),
            tx_id = %config.tx_id,
            rx_id = %config.rx_id,
            "Client adapter open"
        );
        Ok(Self { client, transport })
    }

    pub fn client(&self) -> &UdsClient {
        &self.client
    }

    /// Stop the transport loop and detach from the bus
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

impl Deref for ClientAdapter {
    type Target = UdsClient;

    fn deref(&self) -> &UdsClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[tokio::test]
    async fn test_open_and_close_detach_from_bus() {
        let bus = SimBus::new("vcan1");
        let adapter = ClientAdapter::open(&bus, &ClientConfig::default()).unwrap();
        assert_eq!(bus.port_count(), 1);
        assert!(adapter.transport().is_connected().await);

        adapter.close().await;
        assert_eq!(bus.port_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_address_is_rejected() {
        let bus = SimBus::new("vcan1");
        let config = ClientConfig {
            tx_id: "0x7A8".into(),
            rx_id: "0x7A8".into(),
            ..ClientConfig::default()
        };
        let err = ClientAdapter::open(&bus, &config).err().unwrap();
        assert!(matches!(err, HarnessError::Protocol(_)));
        assert_eq!(bus.port_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_codec_is_rejected() {
        let bus = SimBus::new("vcan1");
        let mut config = ClientConfig::default();
        config
            .data_identifiers
            .insert("0x0100".into(), "Z".into());
        assert!(ClientAdapter::open(&bus, &config).is_err());
    }
}
