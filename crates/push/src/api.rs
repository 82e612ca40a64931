//! Interfaces of the collaborators surrounding the push core: the merge and
//! encode pipeline that turns a snapshot into wire bytes, and the transport
//! that delivers those bytes to a client.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use registry_types::{
    DataCenter,
    Datum,
    PushVersion,
    Subscriber,
    SubscriberId,
};

/// Merges the fetched snapshots and encodes the bytes pushed to one client.
/// Pure with respect to the push core's state; implementations must be
/// thread-safe.
pub trait PushDataGenerator: Send + Sync {
    /// Merge the `data_center` view of `datum_map` on behalf of the
    /// representative `subscriber`.
    fn merge_datum(
        &self,
        subscriber: &Subscriber,
        data_center: &DataCenter,
        datum_map: &BTreeMap<DataCenter, Datum>,
    ) -> anyhow::Result<Datum>;

    /// Encode the merged snapshot for every subscriber on the connection.
    fn create_push_data(
        &self,
        merged: Datum,
        subscriber_map: &BTreeMap<SubscriberId, Arc<Subscriber>>,
        push_version: PushVersion,
    ) -> anyhow::Result<Bytes>;
}

/// Why a transport push did not complete.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The client never answered within the exchange timeout. Retryable.
    #[error("push invocation timed out")]
    InvokeTimeout,
    /// The invocation failed outright; `connected` reports whether the
    /// channel to the client was still open when it did. Only a still-open
    /// channel is worth retrying.
    #[error("push invocation failed (channel connected: {connected})")]
    Invoke {
        connected: bool,
        #[source]
        cause: anyhow::Error,
    },
}

/// Asynchronous delivery of an encoded payload to a client node. The future
/// resolves when the client acknowledges (or the exchange fails); the push
/// core never blocks a dispatcher worker on it.
#[async_trait]
pub trait ClientNodeService: Send + Sync {
    async fn push(&self, payload: Bytes, addr: SocketAddr) -> Result<(), TransportError>;
}
