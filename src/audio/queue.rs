use chrono::{DateTime, Utc};
use std::{collections::VecDeque, fmt, sync::Arc};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    audio::song::Song,
    error::{ControlError, ToggleOutcome},
    model::{ActorId, ChannelTarget, SourceId, TenantId, UiHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No playback, no transport.
    Idle,
    Playing,
    /// Song loaded and transport connected, output suspended.
    Paused,
    /// Transport teardown in progress.
    Disconnecting,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub source: SourceId,
    pub requested_by: ActorId,
    pub title: Option<String>,
    pub author: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(source: SourceId, requested_by: ActorId) -> Self {
        Self {
            source,
            requested_by,
            title: None,
            author: None,
            added_at: Utc::now(),
        }
    }

    /// Title once known, the raw source until then.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(self.source.as_str())
    }
}

/// Everything a worker needs for one playback, handed over at dispatch.
///
/// The worker only ever sees this snapshot; it never touches the queue.
#[derive(Debug)]
pub struct PlayRequest {
    pub tenant: TenantId,
    pub epoch: u64,
    pub entry: QueueEntry,
    pub channel: ChannelTarget,
    pub cancel: CancellationToken,
    pub paused: watch::Receiver<bool>,
}

/// Queue-side controls for the playback currently dispatched.
#[derive(Debug)]
struct ActivePlayback {
    epoch: u64,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

#[derive(Debug)]
struct CurrentSong {
    entry: QueueEntry,
    song: Option<Arc<Song>>,
}

#[derive(Debug)]
pub enum Enqueued {
    /// The tenant was idle: this entry is now playing.
    Started(PlayRequest),
    /// Appended to the pending queue at this 1-based position.
    Appended { position: usize },
}

/// What the engine must do after a playback finished.
#[derive(Debug)]
pub enum Advance {
    Next(PlayRequest),
    /// Disconnect the transport. `ui` is the handle to mark as stopped, if the
    /// session still had one.
    Teardown { ui: Option<UiHandle> },
}

/// Snapshot of one tenant, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantStatus {
    pub state: PlaybackState,
    pub now_playing: Option<String>,
    pub pending: Vec<String>,
    pub owner: Option<ActorId>,
    pub voice: Option<ChannelTarget>,
    pub ui: Option<UiHandle>,
}

/// One tenant's playback state machine.
///
/// Only the engine task owns a `TenantQueue`; every method is synchronous
/// and returns what the engine has to do next (dispatch a worker, disconnect)
/// instead of doing it.
#[derive(Debug)]
pub struct TenantQueue {
    tenant: TenantId,
    state: PlaybackState,
    pending: VecDeque<QueueEntry>,
    current: Option<CurrentSong>,
    voice: Option<ChannelTarget>,
    default_channel: Option<ChannelTarget>,
    ui: Option<UiHandle>,
    owner: Option<ActorId>,
    playback: Option<ActivePlayback>,
    next_epoch: u64,
    max_pending: usize,
    teardown_waiters: Vec<oneshot::Sender<()>>,
    /// Disconnects we asked for whose gateway notice has not arrived yet
    own_disconnects: u32,
    /// The voice connection was already closed from outside
    cut_off: bool,
}

impl TenantQueue {
    pub fn new(tenant: TenantId, max_pending: usize) -> Self {
        Self {
            tenant,
            state: PlaybackState::Idle,
            pending: VecDeque::new(),
            current: None,
            voice: None,
            default_channel: None,
            ui: None,
            owner: None,
            playback: None,
            next_epoch: 1,
            max_pending,
            teardown_waiters: Vec::new(),
            own_disconnects: 0,
            cut_off: false,
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn owner(&self) -> Option<ActorId> {
        self.owner
    }

    pub fn ui(&self) -> Option<UiHandle> {
        self.ui
    }

    /// Enqueue, starting playback atomically if the tenant is idle.
    ///
    /// A caller-supplied channel also becomes the tenant's default channel.
    pub fn enqueue(
        &mut self,
        entry: QueueEntry,
        channel: Option<ChannelTarget>,
    ) -> Result<Enqueued, ControlError> {
        let target = channel.or(self.default_channel);

        match self.state {
            PlaybackState::Idle => {
                let target = target.ok_or(ControlError::NoVoiceChannel)?;
                self.default_channel = Some(target);
                self.owner = Some(entry.requested_by);
                self.voice = Some(target);
                info!("▶️ Nueva sesión en guild {} (canal {})", self.tenant, target);
                Ok(Enqueued::Started(self.begin(entry, target)))
            }
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Disconnecting => {
                if self.pending.len() >= self.max_pending {
                    return Err(ControlError::QueueFull {
                        max: self.max_pending,
                    });
                }
                if let Some(channel) = channel {
                    self.default_channel = Some(channel);
                }
                info!("➕ Agregado a la cola de guild {}: {}", self.tenant, entry.source);
                self.pending.push_back(entry);
                Ok(Enqueued::Appended {
                    position: self.pending.len(),
                })
            }
        }
    }

    fn begin(&mut self, entry: QueueEntry, channel: ChannelTarget) -> PlayRequest {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let cancel = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);

        self.state = PlaybackState::Playing;
        self.current = Some(CurrentSong {
            entry: entry.clone(),
            song: None,
        });
        self.playback = Some(ActivePlayback {
            epoch,
            cancel: cancel.clone(),
            paused: paused_tx,
        });

        PlayRequest {
            tenant: self.tenant,
            epoch,
            entry,
            channel,
            cancel,
            paused: paused_rx,
        }
    }

    pub fn pause(&mut self) -> Result<ToggleOutcome, ControlError> {
        match self.state {
            PlaybackState::Playing => {
                if let Some(playback) = &self.playback {
                    playback.paused.send_replace(true);
                }
                self.state = PlaybackState::Paused;
                Ok(ToggleOutcome::Applied)
            }
            PlaybackState::Paused => Ok(ToggleOutcome::AlreadyInState(PlaybackState::Paused)),
            PlaybackState::Idle | PlaybackState::Disconnecting => Err(ControlError::NoActivePlayback),
        }
    }

    pub fn resume(&mut self) -> Result<ToggleOutcome, ControlError> {
        match self.state {
            PlaybackState::Paused => {
                if let Some(playback) = &self.playback {
                    playback.paused.send_replace(false);
                }
                self.state = PlaybackState::Playing;
                Ok(ToggleOutcome::Applied)
            }
            PlaybackState::Playing => Ok(ToggleOutcome::AlreadyInState(PlaybackState::Playing)),
            PlaybackState::Idle | PlaybackState::Disconnecting => Err(ControlError::NoActivePlayback),
        }
    }

    /// Signals the current playback to end. Returns how many songs will remain
    /// queued once the next one starts.
    pub fn skip(&mut self) -> Result<usize, ControlError> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                if let Some(playback) = &self.playback {
                    playback.cancel.cancel();
                }
                Ok(self.pending.len().saturating_sub(1))
            }
            PlaybackState::Idle | PlaybackState::Disconnecting => Err(ControlError::NoActivePlayback),
        }
    }

    /// Clears the queue and starts tearing the session down.
    ///
    /// Returns the UI handle the session had, so it can be marked as stopped.
    pub fn stop(&mut self) -> Result<Option<UiHandle>, ControlError> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                self.pending.clear();
                self.owner = None;
                self.state = PlaybackState::Disconnecting;
                if let Some(playback) = &self.playback {
                    playback.cancel.cancel();
                }
                info!("⏹️ Deteniendo sesión en guild {}", self.tenant);
                Ok(self.ui.take())
            }
            PlaybackState::Disconnecting => {
                // Lo encolado durante la desconexión también se descarta
                self.pending.clear();
                Ok(None)
            }
            PlaybackState::Idle => Err(ControlError::NoActivePlayback),
        }
    }

    /// Whether a worker for this tenant is still outstanding.
    #[cfg(test)]
    pub fn has_active_playback(&self) -> bool {
        self.playback.is_some()
    }

    /// Records that the worker for `epoch` resolved its song and is streaming.
    pub fn record_started(&mut self, epoch: u64, song: Arc<Song>) -> bool {
        if !self.is_current_epoch(epoch) {
            return false;
        }
        if let Some(current) = self.current.as_mut() {
            current.entry.title = Some(song.title().to_string());
            current.entry.author = Some(song.author().to_string());
            current.song = Some(song);
        }
        true
    }

    /// Fills in metadata for pending entries of `source`. Returns the 1-based
    /// positions that were updated.
    pub fn record_metadata(&mut self, source: &SourceId, title: &str, author: &str) -> Vec<usize> {
        let mut updated = Vec::new();
        for (index, entry) in self.pending.iter_mut().enumerate() {
            if &entry.source == source && entry.title.is_none() {
                entry.title = Some(title.to_string());
                entry.author = Some(author.to_string());
                updated.push(index + 1);
            }
        }
        updated
    }

    /// Handles the completion of the playback dispatched as `epoch`.
    ///
    /// `session_lost` means the transport itself failed: the queue is dropped
    /// and the session torn down instead of advancing.
    pub fn finish(&mut self, epoch: u64, session_lost: bool) -> Option<Advance> {
        if !self.is_current_epoch(epoch) {
            debug!("Finalización obsoleta ignorada en guild {} (epoch {})", self.tenant, epoch);
            return None;
        }
        self.playback = None;
        self.current = None;

        match self.state {
            PlaybackState::Disconnecting => Some(Advance::Teardown { ui: None }),
            PlaybackState::Playing | PlaybackState::Paused => {
                if !session_lost {
                    if let Some(next) = self.pending.pop_front() {
                        let channel = self.voice.or(self.default_channel);
                        if let Some(channel) = channel {
                            info!("➡️ Siguiente en cola (FIFO) en guild {}: {}", self.tenant, next.display_title());
                            return Some(Advance::Next(self.begin(next, channel)));
                        }
                    }
                } else {
                    self.pending.clear();
                }

                info!("📭 Cola vacía en guild {}, desconectando", self.tenant);
                self.state = PlaybackState::Disconnecting;
                self.owner = None;
                Some(Advance::Teardown { ui: self.ui.take() })
            }
            PlaybackState::Idle => None,
        }
    }

    /// Records that the engine is about to leave the voice channel. Discord
    /// reports our own leave like any other, so the notice must not be
    /// mistaken for someone disconnecting the bot.
    ///
    /// Returns whether a notice is expected: none follows when the session
    /// was cut off from outside.
    pub fn expect_own_disconnect(&mut self) -> bool {
        if std::mem::take(&mut self.cut_off) {
            return false;
        }
        self.own_disconnects += 1;
        true
    }

    /// The requested disconnect found no live connection: no notice follows.
    pub fn own_disconnect_was_silent(&mut self) {
        self.own_disconnects = self.own_disconnects.saturating_sub(1);
    }

    /// Handles a notice that the bot left the voice channel.
    ///
    /// Returns `true` when it cut a live session short and the session must be
    /// stopped. Notices for our own disconnects are consumed, and a tenant
    /// that is idle or already disconnecting has nothing left to stop.
    pub fn voice_lost(&mut self) -> bool {
        if self.own_disconnects > 0 {
            self.own_disconnects -= 1;
            debug!("Aviso de desconexión propia consumido en guild {}", self.tenant);
            return false;
        }
        self.cut_off = matches!(self.state, PlaybackState::Playing | PlaybackState::Paused);
        self.cut_off
    }

    /// Whether nothing refers to this queue any more and it can be dropped.
    pub fn is_forgettable(&self) -> bool {
        self.state == PlaybackState::Idle && self.teardown_waiters.is_empty() && self.pending.is_empty()
    }

    pub fn add_teardown_waiter(&mut self, waiter: oneshot::Sender<()>) {
        self.teardown_waiters.push(waiter);
    }

    /// Completes a teardown: the tenant is idle again. If songs were queued
    /// while disconnecting, a new session starts with the oldest of them.
    pub fn teardown_complete(&mut self) -> (Vec<oneshot::Sender<()>>, Option<PlayRequest>) {
        if self.state != PlaybackState::Disconnecting || self.playback.is_some() {
            return (Vec::new(), None);
        }

        self.state = PlaybackState::Idle;
        self.voice = None;
        self.current = None;
        self.ui = None;
        self.owner = None;
        let waiters = std::mem::take(&mut self.teardown_waiters);
        debug!("💤 Guild {} inactiva", self.tenant);

        let restart = match (self.pending.pop_front(), self.default_channel) {
            (Some(head), Some(channel)) => {
                self.owner = Some(head.requested_by);
                self.voice = Some(channel);
                info!("🔁 Reanudando sesión en guild {} con lo encolado durante la desconexión", self.tenant);
                Some(self.begin(head, channel))
            }
            _ => {
                self.pending.clear();
                None
            }
        };

        (waiters, restart)
    }

    /// Records the rendered "now playing" message for this session.
    ///
    /// Refused once the session is ending: teardown would drop the handle
    /// without marking the message as stopped.
    pub fn attach_ui(&mut self, handle: UiHandle) -> bool {
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Disconnecting) {
            return false;
        }
        self.ui = Some(handle);
        true
    }

    /// Song currently streaming, once its worker has resolved it.
    pub fn now_playing(&self) -> Option<Arc<Song>> {
        self.current.as_ref().and_then(|c| c.song.clone())
    }

    pub fn titles(&self) -> Vec<String> {
        self.pending.iter().map(|e| e.display_title().to_string()).collect()
    }

    pub fn status(&self) -> TenantStatus {
        TenantStatus {
            state: self.state,
            now_playing: self
                .current
                .as_ref()
                .map(|c| c.entry.display_title().to_string()),
            pending: self.titles(),
            owner: self.owner,
            voice: self.voice,
            ui: self.ui,
        }
    }

    fn is_current_epoch(&self, epoch: u64) -> bool {
        self.playback.as_ref().is_some_and(|p| p.epoch == epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TENANT: TenantId = TenantId(1);
    const CHANNEL: ChannelTarget = ChannelTarget(10);
    const ALICE: ActorId = ActorId(100);
    const BOB: ActorId = ActorId(200);

    fn entry(raw: &str, by: ActorId) -> QueueEntry {
        QueueEntry::new(SourceId::parse(raw).unwrap(), by)
    }

    fn started(queue: &mut TenantQueue, raw: &str) -> PlayRequest {
        match queue.enqueue(entry(raw, ALICE), Some(CHANNEL)).unwrap() {
            Enqueued::Started(request) => request,
            other => panic!("esperaba Started, llegó {other:?}"),
        }
    }

    #[test]
    fn first_enqueue_starts_and_rest_are_fifo() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");
        assert_eq!(request.entry.source.as_str(), "a");
        assert_eq!(request.channel, CHANNEL);

        for (i, raw) in ["b", "c", "d"].iter().enumerate() {
            match queue.enqueue(entry(raw, BOB), None).unwrap() {
                Enqueued::Appended { position } => assert_eq!(position, i + 1),
                other => panic!("esperaba Appended, llegó {other:?}"),
            }
        }

        let status = queue.status();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.now_playing.as_deref(), Some("a"));
        assert_eq!(status.pending, vec!["b", "c", "d"]);
        assert_eq!(status.owner, Some(ALICE));
        assert_eq!(status.voice, Some(CHANNEL));
    }

    #[test]
    fn idle_enqueue_without_channel_is_rejected_without_change() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let err = queue.enqueue(entry("a", ALICE), None).unwrap_err();
        assert_eq!(err, ControlError::NoVoiceChannel);
        assert_eq!(queue.state(), PlaybackState::Idle);
        assert!(queue.titles().is_empty());
        assert_eq!(queue.owner(), None);
    }

    #[test]
    fn recorded_default_channel_is_reused() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "a");
        queue.stop().unwrap();
        queue.finish(first.epoch, false);
        queue.teardown_complete();

        match queue.enqueue(entry("b", BOB), None).unwrap() {
            Enqueued::Started(request) => assert_eq!(request.channel, CHANNEL),
            other => panic!("esperaba Started, llegó {other:?}"),
        }
        assert_eq!(queue.owner(), Some(BOB));
    }

    #[test]
    fn pause_twice_reports_already_in_state() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");

        assert_eq!(queue.pause().unwrap(), ToggleOutcome::Applied);
        assert!(*request.paused.borrow());
        assert_eq!(
            queue.pause().unwrap(),
            ToggleOutcome::AlreadyInState(PlaybackState::Paused)
        );
        assert_eq!(queue.state(), PlaybackState::Paused);

        assert_eq!(queue.resume().unwrap(), ToggleOutcome::Applied);
        assert!(!*request.paused.borrow());
        assert_eq!(
            queue.resume().unwrap(),
            ToggleOutcome::AlreadyInState(PlaybackState::Playing)
        );
    }

    #[test]
    fn controls_on_idle_tenant_report_no_playback() {
        let mut queue = TenantQueue::new(TENANT, 10);
        assert_eq!(queue.pause().unwrap_err(), ControlError::NoActivePlayback);
        assert_eq!(queue.resume().unwrap_err(), ControlError::NoActivePlayback);
        assert_eq!(queue.skip().unwrap_err(), ControlError::NoActivePlayback);
        assert_eq!(queue.stop().unwrap_err(), ControlError::NoActivePlayback);
        assert_eq!(queue.state(), PlaybackState::Idle);
    }

    #[test]
    fn skip_cancels_and_finish_pops_next() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "x");
        queue.enqueue(entry("y", ALICE), None).unwrap();

        assert_eq!(queue.skip().unwrap(), 0);
        assert!(first.cancel.is_cancelled());
        // El estado no cambia hasta que el worker confirma
        assert_eq!(queue.state(), PlaybackState::Playing);

        match queue.finish(first.epoch, false) {
            Some(Advance::Next(next)) => {
                assert_eq!(next.entry.source.as_str(), "y");
                assert!(next.epoch > first.epoch);
            }
            other => panic!("esperaba Next, llegó {other:?}"),
        }
        assert_eq!(queue.state(), PlaybackState::Playing);
        assert!(queue.titles().is_empty());
    }

    #[test]
    fn skip_reports_remaining_after_next_starts() {
        let mut queue = TenantQueue::new(TENANT, 10);
        started(&mut queue, "a");
        for raw in ["b", "c", "d"] {
            queue.enqueue(entry(raw, ALICE), None).unwrap();
        }
        assert_eq!(queue.skip().unwrap(), 2);
    }

    #[test]
    fn skip_while_paused_resumes_with_next_song() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "a");
        queue.enqueue(entry("b", ALICE), None).unwrap();
        queue.pause().unwrap();

        queue.skip().unwrap();
        match queue.finish(first.epoch, false) {
            Some(Advance::Next(next)) => assert!(!*next.paused.borrow()),
            other => panic!("esperaba Next, llegó {other:?}"),
        }
        assert_eq!(queue.state(), PlaybackState::Playing);
    }

    #[test]
    fn end_of_queue_tears_down_to_idle() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");
        let handle = UiHandle { channel: 5, message: 6 };
        assert!(queue.attach_ui(handle));

        match queue.finish(request.epoch, false) {
            Some(Advance::Teardown { ui }) => assert_eq!(ui, Some(handle)),
            other => panic!("esperaba Teardown, llegó {other:?}"),
        }
        assert_eq!(queue.state(), PlaybackState::Disconnecting);

        let (waiters, restart) = queue.teardown_complete();
        assert!(waiters.is_empty());
        assert!(restart.is_none());

        let status = queue.status();
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.voice, None);
        assert_eq!(status.owner, None);
        assert_eq!(status.ui, None);
    }

    #[test]
    fn stop_clears_everything_and_waits_for_worker() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");
        queue.enqueue(entry("b", ALICE), None).unwrap();
        queue.attach_ui(UiHandle { channel: 1, message: 2 });

        let ui = queue.stop().unwrap();
        assert!(ui.is_some());
        assert!(request.cancel.is_cancelled());
        assert_eq!(queue.state(), PlaybackState::Disconnecting);
        assert!(queue.titles().is_empty());
        assert_eq!(queue.owner(), None);

        // El teardown no termina mientras el worker siga activo
        let (tx, _rx) = oneshot::channel();
        queue.add_teardown_waiter(tx);
        let (waiters, _) = queue.teardown_complete();
        assert!(waiters.is_empty());

        match queue.finish(request.epoch, false) {
            Some(Advance::Teardown { ui }) => assert_eq!(ui, None),
            other => panic!("esperaba Teardown, llegó {other:?}"),
        }
        let (waiters, restart) = queue.teardown_complete();
        assert_eq!(waiters.len(), 1);
        assert!(restart.is_none());
        assert_eq!(queue.state(), PlaybackState::Idle);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "a");
        queue.enqueue(entry("b", ALICE), None).unwrap();
        queue.skip().unwrap();
        let second = match queue.finish(first.epoch, false) {
            Some(Advance::Next(next)) => next,
            other => panic!("esperaba Next, llegó {other:?}"),
        };

        assert!(queue.finish(first.epoch, false).is_none());
        assert_eq!(queue.state(), PlaybackState::Playing);
        assert!(queue.has_active_playback());
        assert!(queue.finish(second.epoch, false).is_some());
    }

    #[test]
    fn enqueue_during_teardown_starts_new_session() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "a");
        queue.stop().unwrap();

        match queue.enqueue(entry("b", BOB), None).unwrap() {
            Enqueued::Appended { position } => assert_eq!(position, 1),
            other => panic!("esperaba Appended, llegó {other:?}"),
        }

        queue.finish(first.epoch, false);
        let (_, restart) = queue.teardown_complete();
        let restart = restart.expect("nueva sesión");
        assert_eq!(restart.entry.source.as_str(), "b");
        assert_eq!(restart.channel, CHANNEL);
        assert_eq!(queue.state(), PlaybackState::Playing);
        assert_eq!(queue.owner(), Some(BOB));
    }

    #[test]
    fn lost_session_drops_the_queue() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");
        queue.enqueue(entry("b", ALICE), None).unwrap();

        match queue.finish(request.epoch, true) {
            Some(Advance::Teardown { .. }) => {}
            other => panic!("esperaba Teardown, llegó {other:?}"),
        }
        assert!(queue.titles().is_empty());
        queue.teardown_complete();
        assert_eq!(queue.state(), PlaybackState::Idle);
    }

    #[test]
    fn full_queue_rejects_without_change() {
        let mut queue = TenantQueue::new(TENANT, 1);
        started(&mut queue, "a");
        queue.enqueue(entry("b", ALICE), None).unwrap();

        let err = queue.enqueue(entry("c", ALICE), None).unwrap_err();
        assert_eq!(err, ControlError::QueueFull { max: 1 });
        assert_eq!(queue.titles(), vec!["b"]);
    }

    #[test]
    fn metadata_fills_pending_titles() {
        let mut queue = TenantQueue::new(TENANT, 10);
        started(&mut queue, "a");
        queue.enqueue(entry("b", ALICE), None).unwrap();
        queue.enqueue(entry("c", ALICE), None).unwrap();
        queue.enqueue(entry("b", ALICE), None).unwrap();

        let positions = queue.record_metadata(&SourceId::parse("b").unwrap(), "Bee", "Band");
        assert_eq!(positions, vec![1, 3]);
        assert_eq!(queue.titles(), vec!["Bee", "c", "Bee"]);
    }

    #[test]
    fn ui_cannot_attach_to_idle_tenant() {
        let mut queue = TenantQueue::new(TENANT, 10);
        assert!(!queue.attach_ui(UiHandle { channel: 1, message: 1 }));
        assert_eq!(queue.ui(), None);
    }

    #[test]
    fn ui_cannot_attach_while_disconnecting() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");
        queue.stop().unwrap();

        assert!(!queue.attach_ui(UiHandle { channel: 1, message: 1 }));
        assert_eq!(queue.ui(), None);

        queue.finish(request.epoch, false);
        queue.teardown_complete();
        assert_eq!(queue.state(), PlaybackState::Idle);
    }

    #[test]
    fn own_disconnect_notice_does_not_stop_the_next_session() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "a");
        queue.enqueue(entry("b", BOB), None).unwrap();
        queue.stop().unwrap();
        queue.enqueue(entry("c", BOB), None).unwrap();

        queue.finish(first.epoch, false);
        assert!(queue.expect_own_disconnect());
        // El aviso puede llegar mientras se desconecta...
        assert!(!queue.voice_lost());
        assert_eq!(queue.titles(), vec!["c"]);

        let (_, restart) = queue.teardown_complete();
        assert!(restart.is_some());
        // ...y un segundo aviso sin desconexión propia corta la sesión nueva
        assert!(queue.voice_lost());
    }

    #[test]
    fn own_disconnect_notice_after_restart_is_consumed() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let first = started(&mut queue, "a");
        queue.finish(first.epoch, false);
        queue.expect_own_disconnect();
        queue.enqueue(entry("b", BOB), None).unwrap();
        queue.teardown_complete();
        assert_eq!(queue.state(), PlaybackState::Playing);

        assert!(!queue.voice_lost());
        assert_eq!(queue.state(), PlaybackState::Playing);
    }

    #[test]
    fn silent_disconnect_leaves_nothing_to_consume() {
        let mut queue = TenantQueue::new(TENANT, 10);
        started(&mut queue, "a");
        queue.expect_own_disconnect();
        queue.own_disconnect_was_silent();
        queue.own_disconnect_was_silent();

        assert!(queue.voice_lost());
    }

    #[test]
    fn cut_off_session_expects_no_notice_for_its_teardown() {
        let mut queue = TenantQueue::new(TENANT, 10);
        let request = started(&mut queue, "a");
        assert!(queue.voice_lost());
        queue.stop().unwrap();

        queue.finish(request.epoch, false);
        assert!(!queue.expect_own_disconnect());
        queue.teardown_complete();

        // La siguiente sesión vuelve a contar sus propias desconexiones
        let request = started(&mut queue, "b");
        queue.finish(request.epoch, false);
        assert!(queue.expect_own_disconnect());
        assert!(!queue.voice_lost());
    }

    #[test]
    fn only_settled_idle_queues_are_forgettable() {
        let mut queue = TenantQueue::new(TENANT, 10);
        assert!(queue.is_forgettable());

        let request = started(&mut queue, "a");
        assert!(!queue.is_forgettable());

        queue.finish(request.epoch, false);
        assert!(!queue.is_forgettable());
        queue.teardown_complete();
        assert!(queue.is_forgettable());
    }
}
