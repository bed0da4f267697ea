use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream as RawStream, Input, LiveInput},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{num::NonZeroU64, sync::Arc};
use symphonia::core::io::MediaSource;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        song::AudioStream,
        transport::{StreamEnd, Transport},
    },
    error::TransportError,
    model::{ChannelTarget, TenantId},
};

/// Voice transport backed by songbird: one `Call` per guild and at most one
/// track per call.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    tracks: DashMap<TenantId, TrackHandle>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            tracks: DashMap::new(),
        }
    }

    fn track(&self, tenant: TenantId) -> Result<TrackHandle, TransportError> {
        self.tracks
            .get(&tenant)
            .map(|track| track.clone())
            .ok_or(TransportError::NoActiveStream)
    }
}

fn guild(tenant: TenantId) -> Result<GuildId, TransportError> {
    NonZeroU64::new(tenant.get())
        .map(GuildId::from)
        .ok_or(TransportError::NotConnected)
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn connect(&self, tenant: TenantId, target: ChannelTarget) -> Result<(), TransportError> {
        let channel = NonZeroU64::new(target.get())
            .map(ChannelId::from)
            .ok_or_else(|| TransportError::Connect("canal inválido".to_string()))?;

        let call = self
            .manager
            .join(guild(tenant)?, channel)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        // Ensordecido como cualquier bot de música
        if let Err(e) = call.lock().await.deafen(true).await {
            debug!("No se pudo ensordecer en guild {}: {}", tenant, e);
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", target, tenant);
        Ok(())
    }

    async fn disconnect(&self, tenant: TenantId) -> Result<(), TransportError> {
        if let Some((_, track)) = self.tracks.remove(&tenant) {
            let _ = track.stop();
        }

        match self.manager.remove(guild(tenant)?).await {
            Ok(()) | Err(songbird::error::JoinError::NoCall) => Ok(()),
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }

    async fn is_connected(&self, tenant: TenantId) -> bool {
        let Ok(guild) = guild(tenant) else {
            return false;
        };
        match self.manager.get(guild) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn play(
        &self,
        tenant: TenantId,
        audio: AudioStream,
        on_complete: oneshot::Sender<StreamEnd>,
    ) -> Result<(), TransportError> {
        let call = self
            .manager
            .get(guild(tenant)?)
            .ok_or(TransportError::NotConnected)?;

        let size = audio.len();
        let media: Box<dyn MediaSource> = Box::new(audio.into_cursor());
        let input = Input::Live(
            LiveInput::Raw(RawStream {
                input: media,
                hint: None,
            }),
            None,
        );

        let track = call.lock().await.play_only_input(input);

        let notifier = StreamEndNotifier {
            tenant,
            sender: Arc::new(Mutex::new(Some(on_complete))),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            track
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| TransportError::Stream(e.to_string()))?;
        }

        debug!("📡 Stream de {} KB entregado a guild {}", size / 1024, tenant);
        self.tracks.insert(tenant, track);
        Ok(())
    }

    fn pause(&self, tenant: TenantId) -> Result<(), TransportError> {
        self.track(tenant)?
            .pause()
            .map_err(|e| TransportError::Stream(e.to_string()))
    }

    fn resume(&self, tenant: TenantId) -> Result<(), TransportError> {
        self.track(tenant)?
            .play()
            .map_err(|e| TransportError::Stream(e.to_string()))
    }

    fn stop(&self, tenant: TenantId) -> Result<(), TransportError> {
        let (_, track) = self
            .tracks
            .remove(&tenant)
            .ok_or(TransportError::NoActiveStream)?;
        track.stop().map_err(|e| TransportError::Stream(e.to_string()))
    }
}

/// Reports the end of a track exactly once, whichever event fires first.
#[derive(Clone)]
struct StreamEndNotifier {
    tenant: TenantId,
    sender: Arc<Mutex<Option<oneshot::Sender<StreamEnd>>>>,
}

#[async_trait]
impl VoiceEventHandler for StreamEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let end = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(StreamEnd::Errored(format!("{e:?}"))),
                    _ => None,
                })
                .unwrap_or(StreamEnd::Finished),
            _ => StreamEnd::Finished,
        };

        if let StreamEnd::Errored(reason) = &end {
            warn!("❌ Error de reproducción en guild {}: {}", self.tenant, reason);
        }

        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(end);
        }
        None
    }
}
