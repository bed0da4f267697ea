use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{Advance, Enqueued, PlayRequest, PlaybackState, QueueEntry, TenantQueue, TenantStatus},
        song::Song,
        transport::Transport,
        worker::{PlaybackOutcome, PlaybackWorker},
    },
    cache::{lru_cache::CacheMetrics, SourceCache},
    control::ControlSurface,
    error::{ControlError, ToggleOutcome},
    model::{Actor, ChannelTarget, SourceId, TenantId, UiHandle},
    permissions::{PermissionGuard, RoleRegistry},
    sources::Resolver,
    ui::UiEvent,
};

type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

/// Result of a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueReceipt {
    /// The tenant was idle; this song is being started.
    Started,
    /// Added behind the current song at this 1-based position.
    Appended { position: usize },
}

/// Requests from the [`ControlSurface`], each with its reply channel.
#[derive(Debug)]
pub enum Command {
    Enqueue {
        tenant: TenantId,
        actor: Actor,
        source: SourceId,
        channel: Option<ChannelTarget>,
        reply: Reply<EnqueueReceipt>,
    },
    Authorize {
        tenant: TenantId,
        actor: Actor,
        reply: Reply<()>,
    },
    Skip {
        tenant: TenantId,
        actor: Actor,
        reply: Reply<usize>,
    },
    Pause {
        tenant: TenantId,
        actor: Actor,
        reply: Reply<ToggleOutcome>,
    },
    Resume {
        tenant: TenantId,
        actor: Actor,
        reply: Reply<ToggleOutcome>,
    },
    /// Replied once the transport is disconnected.
    Stop {
        tenant: TenantId,
        actor: Actor,
        reply: Reply<()>,
    },
    Inspect {
        tenant: TenantId,
        reply: oneshot::Sender<Vec<String>>,
    },
    Status {
        tenant: TenantId,
        reply: oneshot::Sender<TenantStatus>,
    },
    AttachUi {
        tenant: TenantId,
        handle: UiHandle,
        reply: oneshot::Sender<bool>,
    },
    /// The bot left the tenant's voice channel. Replied with whether a live
    /// session was stopped, once its teardown finished.
    VoiceLost {
        tenant: TenantId,
        reply: oneshot::Sender<bool>,
    },
    /// Drops an idle tenant that is gone for good.
    Forget {
        tenant: TenantId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Messages from tasks the engine spawned.
#[derive(Debug)]
pub enum EngineEvent {
    Started {
        tenant: TenantId,
        epoch: u64,
        song: Arc<Song>,
    },
    Finished {
        tenant: TenantId,
        epoch: u64,
        outcome: PlaybackOutcome,
    },
    Prefetched {
        tenant: TenantId,
        song: Arc<Song>,
    },
    Disconnected {
        tenant: TenantId,
        /// A gateway notice was expected but there was no connection to leave
        silent: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStats {
    pub tenants: usize,
    pub active_sessions: usize,
    pub active_workers: usize,
    pub cache: CacheMetrics,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_queue_size: usize,
    pub prefetch_concurrency: usize,
    pub command_buffer: usize,
    pub connect_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            prefetch_concurrency: 2,
            command_buffer: 256,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Single owner of every [`TenantQueue`].
///
/// Runs as one task consuming commands and worker events. Handlers never
/// await: anything slow (connect, resolve, stream, disconnect, render) runs
/// in a spawned task and reports back through an [`EngineEvent`], so one
/// tenant can never stall another.
pub struct PlaybackEngine {
    tenants: HashMap<TenantId, TenantQueue>,
    commands: mpsc::Receiver<Command>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    events: mpsc::UnboundedSender<EngineEvent>,
    worker: PlaybackWorker,
    cache: Arc<SourceCache>,
    transport: Arc<dyn Transport>,
    roles: Arc<RoleRegistry>,
    ui: mpsc::UnboundedSender<UiEvent>,
    prefetch: Arc<Semaphore>,
    max_queue_size: usize,
}

impl PlaybackEngine {
    /// Starts the engine task and returns the control API in front of it.
    pub fn spawn(
        settings: EngineSettings,
        cache: Arc<SourceCache>,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn Resolver>,
        roles: Arc<RoleRegistry>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> (ControlSurface, JoinHandle<()>) {
        let (command_tx, commands) = mpsc::channel(settings.command_buffer.max(1));
        let (events, events_rx) = mpsc::unbounded_channel();

        let worker = PlaybackWorker::new(
            cache.clone(),
            transport.clone(),
            events.clone(),
            settings.connect_timeout,
        );
        let gauge = worker.gauge();

        let engine = Self {
            tenants: HashMap::new(),
            commands,
            events_rx,
            events,
            worker,
            cache,
            transport,
            roles: roles.clone(),
            ui,
            prefetch: Arc::new(Semaphore::new(settings.prefetch_concurrency.max(1))),
            max_queue_size: settings.max_queue_size,
        };

        let handle = tokio::spawn(engine.run());
        (ControlSurface::new(command_tx, roles, resolver, gauge), handle)
    }

    async fn run(mut self) {
        info!("🎛️ Motor de reproducción iniciado");

        loop {
            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => self.handle_event(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        info!("🛑 Motor de reproducción detenido");
    }

    fn queue_mut(&mut self, tenant: TenantId) -> &mut TenantQueue {
        let max = self.max_queue_size;
        self.tenants
            .entry(tenant)
            .or_insert_with(|| TenantQueue::new(tenant, max))
    }

    fn authorize(&mut self, tenant: TenantId, actor: &Actor) -> Result<&mut TenantQueue, ControlError> {
        let role = self.roles.cached(tenant);
        let queue = self.queue_mut(tenant);
        PermissionGuard::check(actor, queue, role)?;
        Ok(queue)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                tenant,
                actor,
                source,
                channel,
                reply,
            } => {
                let result = self.enqueue(tenant, &actor, source, channel);
                let _ = reply.send(result);
            }
            Command::Authorize { tenant, actor, reply } => {
                let result = self.authorize(tenant, &actor).map(|_| ());
                let _ = reply.send(result);
            }
            Command::Skip { tenant, actor, reply } => {
                let result = self.skip(tenant, &actor);
                let _ = reply.send(result);
            }
            Command::Pause { tenant, actor, reply } => {
                let result = self.authorize(tenant, &actor).and_then(|queue| queue.pause());
                let _ = reply.send(result);
            }
            Command::Resume { tenant, actor, reply } => {
                let result = self.authorize(tenant, &actor).and_then(|queue| queue.resume());
                let _ = reply.send(result);
            }
            Command::Stop { tenant, actor, reply } => self.stop(tenant, &actor, reply),
            Command::Inspect { tenant, reply } => {
                let _ = reply.send(self.queue_mut(tenant).titles());
            }
            Command::Status { tenant, reply } => {
                let _ = reply.send(self.queue_mut(tenant).status());
            }
            Command::AttachUi { tenant, handle, reply } => {
                let _ = reply.send(self.attach_ui(tenant, handle));
            }
            Command::VoiceLost { tenant, reply } => self.voice_lost(tenant, reply),
            Command::Forget { tenant, reply } => {
                let _ = reply.send(self.forget(tenant));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn enqueue(
        &mut self,
        tenant: TenantId,
        actor: &Actor,
        source: SourceId,
        channel: Option<ChannelTarget>,
    ) -> Result<EnqueueReceipt, ControlError> {
        let queue = self.authorize(tenant, actor)?;
        let entry = QueueEntry::new(source.clone(), actor.id);

        match queue.enqueue(entry, channel)? {
            Enqueued::Started(request) => {
                self.dispatch(request);
                Ok(EnqueueReceipt::Started)
            }
            Enqueued::Appended { position } => {
                self.prefetch(tenant, source);
                Ok(EnqueueReceipt::Appended { position })
            }
        }
    }

    fn skip(&mut self, tenant: TenantId, actor: &Actor) -> Result<usize, ControlError> {
        let queue = self.authorize(tenant, actor)?;
        let remaining = queue.skip()?;
        let handle = queue.ui();

        info!("⏭️ Canción saltada en guild {} (quedan {})", tenant, remaining);
        self.emit(UiEvent::Skipped {
            tenant,
            handle,
            remaining,
        });
        Ok(remaining)
    }

    fn stop(&mut self, tenant: TenantId, actor: &Actor, reply: Reply<()>) {
        let queue = match self.authorize(tenant, actor) {
            Ok(queue) => queue,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        match queue.stop() {
            Ok(handle) => {
                // Responder cuando el transporte quede desconectado
                let (done_tx, done_rx) = oneshot::channel();
                queue.add_teardown_waiter(done_tx);

                tokio::spawn(async move {
                    let _ = done_rx.await;
                    let _ = reply.send(Ok(()));
                });

                if handle.is_some() {
                    self.emit(UiEvent::Stopped { tenant, handle });
                }
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn voice_lost(&mut self, tenant: TenantId, reply: oneshot::Sender<bool>) {
        let Some(queue) = self.tenants.get_mut(&tenant) else {
            let _ = reply.send(false);
            return;
        };
        if !queue.voice_lost() {
            debug!("Desconexión de voz ignorada en guild {} ({})", tenant, queue.state());
            let _ = reply.send(false);
            return;
        }

        warn!("🔌 Sesión de guild {} cortada desde fuera, deteniendo", tenant);
        let (done_tx, done_rx) = oneshot::channel();
        self.stop(tenant, &Actor::system(), done_tx);
        tokio::spawn(async move {
            let stopped = matches!(done_rx.await, Ok(Ok(())));
            let _ = reply.send(stopped);
        });
    }

    fn forget(&mut self, tenant: TenantId) -> bool {
        let gauge = self.worker.gauge();
        let Some(queue) = self.tenants.get(&tenant) else {
            gauge.forget(tenant);
            return false;
        };
        if !queue.is_forgettable() {
            debug!("Guild {} sigue activa ({}), no se descarta", tenant, queue.state());
            return false;
        }

        self.tenants.remove(&tenant);
        gauge.forget(tenant);
        info!("🗑️ Estado de guild {} descartado", tenant);
        true
    }

    fn attach_ui(&mut self, tenant: TenantId, handle: UiHandle) -> bool {
        let queue = self.queue_mut(tenant);
        if !queue.attach_ui(handle) {
            return false;
        }

        // Si la canción ya empezó, el evento Started llegó antes que el mensaje
        if let Some(song) = queue.now_playing() {
            self.emit(UiEvent::NowPlaying {
                tenant,
                handle: Some(handle),
                title: song.title().to_string(),
                author: song.author().to_string(),
                duration: song.duration(),
            });
        }
        true
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            tenants: self.tenants.len(),
            active_sessions: self
                .tenants
                .values()
                .filter(|q| q.state() != PlaybackState::Idle)
                .count(),
            active_workers: self.worker.gauge().total_active(),
            cache: self.cache.metrics(),
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Started { tenant, epoch, song } => {
                let Some(queue) = self.tenants.get_mut(&tenant) else {
                    return;
                };
                if queue.record_started(epoch, song.clone()) {
                    let handle = queue.ui();
                    self.emit(UiEvent::NowPlaying {
                        tenant,
                        handle,
                        title: song.title().to_string(),
                        author: song.author().to_string(),
                        duration: song.duration(),
                    });
                }
            }
            EngineEvent::Finished { tenant, epoch, outcome } => self.on_finished(tenant, epoch, outcome),
            EngineEvent::Prefetched { tenant, song } => {
                let Some(queue) = self.tenants.get_mut(&tenant) else {
                    return;
                };
                let handle = queue.ui();
                for position in queue.record_metadata(song.source(), song.title(), song.author()) {
                    self.emit(UiEvent::Queued {
                        tenant,
                        handle,
                        title: song.title().to_string(),
                        author: song.author().to_string(),
                        position,
                    });
                }
            }
            EngineEvent::Disconnected { tenant, silent } => {
                if silent {
                    if let Some(queue) = self.tenants.get_mut(&tenant) {
                        queue.own_disconnect_was_silent();
                    }
                }
                self.try_complete_teardown(tenant)
            }
        }
    }

    fn on_finished(&mut self, tenant: TenantId, epoch: u64, outcome: PlaybackOutcome) {
        let Some(queue) = self.tenants.get_mut(&tenant) else {
            return;
        };
        let handle = queue.ui();
        let current = queue.status().now_playing;

        match &outcome {
            PlaybackOutcome::Completed | PlaybackOutcome::Stopped => {
                debug!("Reproducción terminada en guild {} (epoch {}): {:?}", tenant, epoch, outcome)
            }
            PlaybackOutcome::Aborted => error!("💥 Worker abortado en guild {} (epoch {})", tenant, epoch),
            failed => warn!("❌ Reproducción fallida en guild {}: {:?}", tenant, failed),
        }

        let Some(advance) = queue.finish(epoch, outcome.session_lost()) else {
            return;
        };
        let notice_expected = match advance {
            Advance::Teardown { .. } => queue.expect_own_disconnect(),
            Advance::Next(_) => false,
        };

        if let Some(reason) = failure_reason(&outcome) {
            self.emit(UiEvent::Failed {
                tenant,
                handle,
                title: current.unwrap_or_default(),
                reason,
            });
        }

        match advance {
            Advance::Next(request) => self.dispatch(request),
            Advance::Teardown { ui } => {
                if ui.is_some() {
                    self.emit(UiEvent::Stopped { tenant, handle: ui });
                }
                self.disconnect(tenant, notice_expected);
            }
        }
    }

    fn try_complete_teardown(&mut self, tenant: TenantId) {
        let Some(queue) = self.tenants.get_mut(&tenant) else {
            return;
        };
        let (waiters, restart) = queue.teardown_complete();
        for waiter in waiters {
            let _ = waiter.send(());
        }
        if let Some(request) = restart {
            self.dispatch(request);
        }
    }

    fn dispatch(&self, request: PlayRequest) {
        let waited = chrono::Utc::now() - request.entry.added_at;
        debug!(
            "🚀 Despachando worker para guild {} (epoch {}): {} tras {}s en cola",
            request.tenant,
            request.epoch,
            request.entry.source,
            waited.num_seconds()
        );
        self.worker.spawn(request);
    }

    fn disconnect(&self, tenant: TenantId, notice_expected: bool) {
        let transport = self.transport.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let silent = notice_expected && !transport.is_connected(tenant).await;
            if let Err(e) = transport.disconnect(tenant).await {
                warn!("Error al desconectar guild {}: {}", tenant, e);
            }
            info!("👋 Desconectado de voz en guild {}", tenant);
            let _ = events.send(EngineEvent::Disconnected { tenant, silent });
        });
    }

    /// Resolves an appended song in the background so its title is known
    /// before it plays.
    fn prefetch(&self, tenant: TenantId, source: SourceId) {
        let cache = self.cache.clone();
        let events = self.events.clone();
        let permits = self.prefetch.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match cache.resolve(&source).await {
                Ok(song) => {
                    let _ = events.send(EngineEvent::Prefetched { tenant, song });
                }
                Err(e) => debug!("Prefetch fallido para {}: {}", source, e),
            }
        });
    }

    fn emit(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            debug!("Presentador no disponible");
        }
    }
}

fn failure_reason(outcome: &PlaybackOutcome) -> Option<String> {
    match outcome {
        PlaybackOutcome::Completed | PlaybackOutcome::Stopped => None,
        PlaybackOutcome::ResolutionFailed(e) => Some(e.to_string()),
        PlaybackOutcome::TransportUnavailable(e) => Some(e.to_string()),
        PlaybackOutcome::StreamFailed(reason) => Some(reason.clone()),
        PlaybackOutcome::Aborted => Some("la reproducción terminó inesperadamente".to_string()),
    }
}
