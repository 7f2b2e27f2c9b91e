use std::{sync::Arc, time::Duration};

use log::debug;

use crate::{
    protocol::{RemoteStore, SERVICE_NAME},
    transport::{Connection, Endpoint, TransportError},
};

use super::{
    Closeable, ConnectionDescriptor, Connector, Session,
    cache::{Cached, ConnectionKey, EndpointKey, ResourceCache},
};

/// Opens naming channels over cached transport connections.
pub struct TransportConnector {
    endpoint: Cached<EndpointKey, Endpoint>,
    connections: ResourceCache<ConnectionKey, Connection>,
    request_timeout: Duration,
}

impl TransportConnector {
    pub fn new(
        endpoint: Cached<EndpointKey, Endpoint>,
        connections: ResourceCache<ConnectionKey, Connection>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            connections,
            request_timeout,
        }
    }
}

impl Connector for TransportConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Session, TransportError> {
        let key = ConnectionKey::new(self.endpoint.key().clone(), descriptor);
        // a connection the peer has dropped is replaced rather than reused
        let connection = self.connections.get_valid(
            key,
            |connection| !connection.is_closed(),
            || {
                self.endpoint.connect(
                    &descriptor.destination,
                    &descriptor.connect_options,
                    descriptor.authenticator.as_ref(),
                    descriptor.connect_timeout,
                )
            },
        )?;

        let channel = connection.open_channel(
            SERVICE_NAME,
            &descriptor.channel_options,
            descriptor.channel_timeout,
        )?;
        let store = RemoteStore::connect(channel, self.request_timeout, descriptor.channel_timeout)?;
        debug!("naming store ready on {}", descriptor.destination);

        Ok(Session {
            store,
            connection: Some(Arc::new(connection)),
        })
    }

    fn close(&self) {
        if let Err(e) = Closeable::close(&self.endpoint) {
            debug!("failed to release endpoint: {e}");
        }
    }
}
