//! # Control Surface
//!
//! Request API used by the Discord handlers. Every call is a message to the
//! playback engine, so it can be issued from any task; the engine applies
//! them one at a time.
//!
//! `enqueue` returns as soon as the song is queued or dispatched. Playback
//! progress is observed through the presenter, never through the reply.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        engine::{Command, EngineStats, EnqueueReceipt},
        queue::TenantStatus,
        worker::WorkerGauge,
    },
    error::{ControlError, ToggleOutcome},
    model::{Actor, ChannelTarget, RoleId, SourceId, TenantId, UiHandle},
    permissions::RoleRegistry,
    sources::Resolver,
};

#[derive(Clone)]
pub struct ControlSurface {
    commands: mpsc::Sender<Command>,
    roles: Arc<RoleRegistry>,
    resolver: Arc<dyn Resolver>,
    gauge: Arc<WorkerGauge>,
}

impl ControlSurface {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        roles: Arc<RoleRegistry>,
        resolver: Arc<dyn Resolver>,
        gauge: Arc<WorkerGauge>,
    ) -> Self {
        Self {
            commands,
            roles,
            resolver,
            gauge,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ControlError::EngineUnavailable)?;
        response.await.map_err(|_| ControlError::EngineUnavailable)
    }

    /// Queues `source`, starting playback if the tenant is idle.
    pub async fn enqueue(
        &self,
        actor: &Actor,
        tenant: TenantId,
        source: &str,
        channel: Option<ChannelTarget>,
    ) -> Result<EnqueueReceipt, ControlError> {
        let source = SourceId::parse(source).ok_or(ControlError::InvalidSource)?;
        self.enqueue_source(actor, tenant, source, channel).await
    }

    async fn enqueue_source(
        &self,
        actor: &Actor,
        tenant: TenantId,
        source: SourceId,
        channel: Option<ChannelTarget>,
    ) -> Result<EnqueueReceipt, ControlError> {
        self.roles.ensure_loaded(tenant).await;
        let actor = actor.clone();
        self.request(|reply| Command::Enqueue {
            tenant,
            actor,
            source,
            channel,
            reply,
        })
        .await?
    }

    /// Queues the first search result for `query`.
    pub async fn enqueue_search(
        &self,
        actor: &Actor,
        tenant: TenantId,
        query: &str,
        channel: Option<ChannelTarget>,
    ) -> Result<EnqueueReceipt, ControlError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ControlError::InvalidSource);
        }

        // No buscar para quien no puede reproducir
        self.roles.ensure_loaded(tenant).await;
        let requester = actor.clone();
        self.request(|reply| Command::Authorize {
            tenant,
            actor: requester,
            reply,
        })
        .await??;

        let source = self
            .resolver
            .search(query)
            .await?
            .ok_or(ControlError::NoSearchResults)?;
        debug!("🔍 '{}' → {}", query, source);

        self.enqueue_source(actor, tenant, source, channel).await
    }

    /// Ends the current song. Returns how many songs remain queued after the
    /// next one starts.
    pub async fn skip(&self, actor: &Actor, tenant: TenantId) -> Result<usize, ControlError> {
        self.roles.ensure_loaded(tenant).await;
        let actor = actor.clone();
        self.request(|reply| Command::Skip { tenant, actor, reply }).await?
    }

    pub async fn pause(&self, actor: &Actor, tenant: TenantId) -> Result<ToggleOutcome, ControlError> {
        self.roles.ensure_loaded(tenant).await;
        let actor = actor.clone();
        self.request(|reply| Command::Pause { tenant, actor, reply }).await?
    }

    pub async fn resume(&self, actor: &Actor, tenant: TenantId) -> Result<ToggleOutcome, ControlError> {
        self.roles.ensure_loaded(tenant).await;
        let actor = actor.clone();
        self.request(|reply| Command::Resume { tenant, actor, reply }).await?
    }

    /// Clears the queue and disconnects. Returns once the tenant is idle.
    pub async fn stop(&self, actor: &Actor, tenant: TenantId) -> Result<(), ControlError> {
        self.roles.ensure_loaded(tenant).await;
        let actor = actor.clone();
        self.request(|reply| Command::Stop { tenant, actor, reply }).await?
    }

    /// Titles waiting behind the current song, in play order.
    pub async fn inspect(&self, tenant: TenantId) -> Result<Vec<String>, ControlError> {
        self.request(|reply| Command::Inspect { tenant, reply }).await
    }

    pub async fn status(&self, tenant: TenantId) -> Result<TenantStatus, ControlError> {
        self.request(|reply| Command::Status { tenant, reply }).await
    }

    /// Records the message rendering this tenant's session. Returns `false`
    /// if the session already ended.
    pub async fn attach_ui(&self, tenant: TenantId, handle: UiHandle) -> Result<bool, ControlError> {
        self.request(|reply| Command::AttachUi { tenant, handle, reply }).await
    }

    /// Handles the bot leaving a voice channel. A live session cut short from
    /// outside is torn down; the notices of our own disconnects are ignored.
    ///
    /// Returns whether a session was stopped.
    pub async fn voice_lost(&self, tenant: TenantId) -> bool {
        match self.request(|reply| Command::VoiceLost { tenant, reply }).await {
            Ok(true) => {
                info!("🔌 Sesión de guild {} cerrada tras desconexión externa", tenant);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("Desconexión externa en guild {}: {}", tenant, e);
                false
            }
        }
    }

    pub async fn set_music_role(&self, actor: &Actor, tenant: TenantId, role: RoleId) -> Result<(), ControlError> {
        self.roles.set(actor, tenant, role).await
    }

    pub async fn music_role(&self, tenant: TenantId) -> Option<RoleId> {
        self.roles.ensure_loaded(tenant).await
    }

    pub async fn preload_roles(&self, tenants: impl IntoIterator<Item = TenantId>) {
        self.roles.preload(tenants).await;
    }

    /// Drops everything kept for a tenant the bot no longer serves. A tenant
    /// that is still playing keeps its queue.
    pub async fn forget_tenant(&self, tenant: TenantId) {
        self.roles.forget(tenant);
        match self.request(|reply| Command::Forget { tenant, reply }).await {
            Ok(true) => debug!("Guild {} olvidada", tenant),
            Ok(false) => {}
            Err(e) => warn!("No se pudo olvidar guild {}: {}", tenant, e),
        }
    }

    /// Playback workers currently running for `tenant`.
    #[allow(dead_code)]
    pub fn active_workers(&self, tenant: TenantId) -> usize {
        self.gauge.active(tenant)
    }

    pub async fn stats(&self) -> Result<EngineStats, ControlError> {
        self.request(|reply| Command::Stats { reply }).await
    }
}
