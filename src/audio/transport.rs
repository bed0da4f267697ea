use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{
    audio::song::AudioStream,
    error::TransportError,
    model::{ChannelTarget, TenantId},
};

/// How a stream handed to [`Transport::play`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Reached the end of the audio, or was stopped.
    Finished,
    /// The transport gave up on the stream.
    Errored(String),
}

/// Voice output connection, one per tenant.
///
/// Connections are keyed by tenant: the tenant id is the connection handle.
/// `play` hands over the stream and reports its end exactly once through
/// `on_complete`; dropping the sender without sending counts as an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, tenant: TenantId, target: ChannelTarget) -> Result<(), TransportError>;

    async fn disconnect(&self, tenant: TenantId) -> Result<(), TransportError>;

    async fn is_connected(&self, tenant: TenantId) -> bool;

    async fn play(
        &self,
        tenant: TenantId,
        audio: AudioStream,
        on_complete: oneshot::Sender<StreamEnd>,
    ) -> Result<(), TransportError>;

    fn pause(&self, tenant: TenantId) -> Result<(), TransportError>;

    fn resume(&self, tenant: TenantId) -> Result<(), TransportError>;

    fn stop(&self, tenant: TenantId) -> Result<(), TransportError>;
}
