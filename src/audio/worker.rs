use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        engine::EngineEvent,
        queue::PlayRequest,
        transport::{StreamEnd, Transport},
    },
    cache::SourceCache,
    error::{ResolveError, TransportError},
    model::TenantId,
};

/// How one dispatched playback ended. Reported exactly once per dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The stream reached its end.
    Completed,
    /// Cancelled by skip or stop.
    Stopped,
    ResolutionFailed(ResolveError),
    /// Could not connect, or the connection vanished under the stream.
    TransportUnavailable(TransportError),
    StreamFailed(String),
    /// The worker task ended without reporting (panic or runtime shutdown).
    Aborted,
}

impl PlaybackOutcome {
    /// The voice session itself is gone, so there is nothing to advance to.
    pub fn session_lost(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_))
    }
}

/// Sends `Finished` for its playback when dropped, unless already sent.
struct CompletionGuard {
    events: mpsc::UnboundedSender<EngineEvent>,
    tenant: TenantId,
    epoch: u64,
    reported: bool,
}

impl CompletionGuard {
    fn new(events: mpsc::UnboundedSender<EngineEvent>, tenant: TenantId, epoch: u64) -> Self {
        Self {
            events,
            tenant,
            epoch,
            reported: false,
        }
    }

    fn report(mut self, outcome: PlaybackOutcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: PlaybackOutcome) {
        self.reported = true;
        let _ = self.events.send(EngineEvent::Finished {
            tenant: self.tenant,
            epoch: self.epoch,
            outcome,
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.reported {
            warn!("⚠️ Worker de guild {} terminó sin reportar (epoch {})", self.tenant, self.epoch);
            self.send(PlaybackOutcome::Aborted);
        }
    }
}

/// Live count of workers per tenant, with the highest count ever seen.
#[derive(Debug, Default)]
pub struct WorkerGauge {
    active: DashMap<TenantId, usize>,
    peak: DashMap<TenantId, usize>,
}

impl WorkerGauge {
    fn enter(self: &Arc<Self>, tenant: TenantId) -> ActiveWorker {
        let now = {
            let mut active = self.active.entry(tenant).or_insert(0);
            *active += 1;
            *active
        };
        let mut peak = self.peak.entry(tenant).or_insert(0);
        *peak = (*peak).max(now);

        ActiveWorker {
            gauge: self.clone(),
            tenant,
        }
    }

    pub fn active(&self, tenant: TenantId) -> usize {
        self.active.get(&tenant).map(|n| *n).unwrap_or(0)
    }

    #[allow(dead_code)]
    pub fn peak(&self, tenant: TenantId) -> usize {
        self.peak.get(&tenant).map(|n| *n).unwrap_or(0)
    }

    pub fn total_active(&self) -> usize {
        self.active.iter().map(|entry| *entry.value()).sum()
    }

    /// Drops the counters of a tenant with no running worker.
    pub fn forget(&self, tenant: TenantId) {
        if self.active.remove_if(&tenant, |_, active| *active == 0).is_some()
            || !self.active.contains_key(&tenant)
        {
            self.peak.remove(&tenant);
        }
    }
}

struct ActiveWorker {
    gauge: Arc<WorkerGauge>,
    tenant: TenantId,
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        if let Some(mut active) = self.gauge.active.get_mut(&self.tenant) {
            *active = active.saturating_sub(1);
        }
    }
}

/// Runs dispatched playbacks: connect if needed, resolve through the cache,
/// stream, and report back to the engine.
///
/// A worker only sees its [`PlayRequest`]; it never touches tenant state.
#[derive(Clone)]
pub struct PlaybackWorker {
    cache: Arc<SourceCache>,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<EngineEvent>,
    gauge: Arc<WorkerGauge>,
    connect_timeout: Duration,
}

impl PlaybackWorker {
    pub fn new(
        cache: Arc<SourceCache>,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<EngineEvent>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            transport,
            events,
            gauge: Arc::new(WorkerGauge::default()),
            connect_timeout,
        }
    }

    pub fn gauge(&self) -> Arc<WorkerGauge> {
        self.gauge.clone()
    }

    pub fn spawn(&self, request: PlayRequest) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move { worker.run(request).await })
    }

    async fn run(self, request: PlayRequest) {
        let guard = CompletionGuard::new(self.events.clone(), request.tenant, request.epoch);
        let outcome = {
            let _active = self.gauge.enter(request.tenant);
            self.play(request).await
        };
        guard.report(outcome);
    }

    async fn play(&self, request: PlayRequest) -> PlaybackOutcome {
        let PlayRequest {
            tenant,
            epoch,
            entry,
            channel,
            cancel,
            mut paused,
        } = request;

        if cancel.is_cancelled() {
            return PlaybackOutcome::Stopped;
        }

        if !self.transport.is_connected(tenant).await {
            info!("🔊 Conectando a canal de voz {} en guild {}", channel, tenant);
            let connect = tokio::time::timeout(self.connect_timeout, self.transport.connect(tenant, channel));
            let connected = tokio::select! {
                _ = cancel.cancelled() => return PlaybackOutcome::Stopped,
                result = connect => result,
            };
            match connected {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return PlaybackOutcome::TransportUnavailable(e),
                Err(_) => return PlaybackOutcome::TransportUnavailable(TransportError::Timeout),
            }
        }

        let song = tokio::select! {
            _ = cancel.cancelled() => return PlaybackOutcome::Stopped,
            resolved = self.cache.resolve(&entry.source) => match resolved {
                Ok(song) => song,
                Err(e) => return PlaybackOutcome::ResolutionFailed(e),
            },
        };

        let (done_tx, mut done_rx) = oneshot::channel();
        if let Err(e) = self.transport.play(tenant, song.stream(), done_tx).await {
            return match e {
                TransportError::NotConnected => PlaybackOutcome::TransportUnavailable(e),
                other => PlaybackOutcome::StreamFailed(other.to_string()),
            };
        }

        info!(
            "🎵 Reproduciendo en guild {}: {} ({} KB)",
            tenant,
            song.title(),
            song.size_bytes() / 1024
        );
        let _ = self.events.send(EngineEvent::Started {
            tenant,
            epoch,
            song: song.clone(),
        });

        if *paused.borrow_and_update() {
            if let Err(e) = self.transport.pause(tenant) {
                warn!("No se pudo pausar al iniciar en guild {}: {}", tenant, e);
            }
        }

        let mut watching_pause = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("⏭️ Reproducción cancelada en guild {} (epoch {})", tenant, epoch);
                    if let Err(e) = self.transport.stop(tenant) {
                        debug!("Stop sin stream activo en guild {}: {}", tenant, e);
                    }
                    return PlaybackOutcome::Stopped;
                }
                changed = paused.changed(), if watching_pause => {
                    if changed.is_err() {
                        watching_pause = false;
                        continue;
                    }
                    let pause = *paused.borrow_and_update();
                    let applied = if pause {
                        self.transport.pause(tenant)
                    } else {
                        self.transport.resume(tenant)
                    };
                    if let Err(e) = applied {
                        warn!("No se pudo cambiar la pausa en guild {}: {}", tenant, e);
                    }
                }
                end = &mut done_rx => {
                    return match end {
                        Ok(StreamEnd::Finished) => PlaybackOutcome::Completed,
                        Ok(StreamEnd::Errored(reason)) => PlaybackOutcome::StreamFailed(reason),
                        Err(_) => PlaybackOutcome::StreamFailed("el transporte descartó el stream".to_string()),
                    };
                }
            }
        }
    }
}
