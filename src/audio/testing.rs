//! In-memory resolver and transport used by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    io::Read,
    time::Duration,
};
use tokio::sync::{oneshot, watch};

use crate::{
    audio::{
        song::AudioStream,
        transport::{StreamEnd, Transport},
    },
    error::{ResolveError, TransportError},
    model::{ChannelTarget, SourceId, TenantId},
    sources::{ResolvedTrack, Resolver},
};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Resolves every source to a song titled after the source, whose audio is
/// the source string itself. Optionally gated: resolutions block until
/// [`FakeResolver::release`].
pub struct FakeResolver {
    gate: watch::Sender<bool>,
    calls: watch::Sender<usize>,
    failing: Mutex<HashSet<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            gate: watch::Sender::new(true),
            calls: watch::Sender::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn gated() -> Self {
        let resolver = Self::new();
        resolver.gate.send_replace(false);
        resolver
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn fail_on(&self, source: &str) {
        self.failing.lock().insert(source.to_string());
    }

    pub fn heal(&self, source: &str) {
        self.failing.lock().remove(source);
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        let reached = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(|calls| *calls >= n)).await;
        assert!(reached.is_ok(), "el resolvedor no recibió {n} llamadas");
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, source: &SourceId) -> Result<ResolvedTrack, ResolveError> {
        self.calls.send_modify(|calls| *calls += 1);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if self.failing.lock().contains(source.as_str()) {
            return Err(ResolveError::NotFound(source.to_string()));
        }

        Ok(ResolvedTrack {
            title: source.to_string(),
            author: "Fake".to_string(),
            duration: Some(Duration::from_secs(1)),
            audio: Bytes::from(source.to_string()),
        })
    }

    async fn search(&self, query: &str) -> Result<Option<SourceId>, ResolveError> {
        Ok(SourceId::parse(&format!("search:{query}")))
    }
}

/// Everything the fake transport has observed.
#[derive(Debug, Default)]
pub struct Recorded {
    pub connected: HashSet<TenantId>,
    pub connects: Vec<(TenantId, ChannelTarget)>,
    pub disconnects: Vec<TenantId>,
    /// `(tenant, audio)` for every stream handed to `play`, in order.
    pub played: Vec<(TenantId, String)>,
    pub paused: HashSet<TenantId>,
    streams: HashMap<TenantId, oneshot::Sender<StreamEnd>>,
    fail_connect: bool,
}

impl Recorded {
    pub fn is_streaming(&self, tenant: TenantId) -> bool {
        self.streams.contains_key(&tenant)
    }

    pub fn plays_for(&self, tenant: TenantId) -> Vec<String> {
        self.played
            .iter()
            .filter(|(t, _)| *t == tenant)
            .map(|(_, audio)| audio.clone())
            .collect()
    }
}

/// Transport whose streams only end when a test says so.
pub struct FakeTransport {
    state: Mutex<Recorded>,
    changes: watch::Sender<u64>,
    /// Disconnects wait while this is `false`
    disconnects_open: watch::Sender<bool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Recorded::default()),
            changes: watch::Sender::new(0),
            disconnects_open: watch::Sender::new(true),
        }
    }

    pub fn failing_connect() -> Self {
        let transport = Self::new();
        transport.state.lock().fail_connect = true;
        transport
    }

    /// Keeps every later disconnect pending until [`Self::release_disconnects`].
    pub fn hold_disconnects(&self) {
        self.disconnects_open.send_replace(false);
    }

    pub fn release_disconnects(&self) {
        self.disconnects_open.send_replace(true);
    }

    fn update<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let result = f(&mut self.state.lock());
        self.changes.send_modify(|n| *n += 1);
        result
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.state.lock())
    }

    /// Ends the tenant's current stream as if the audio ran out.
    pub fn finish_stream(&self, tenant: TenantId) {
        self.end_stream(tenant, StreamEnd::Finished);
    }

    pub fn fail_stream(&self, tenant: TenantId, reason: &str) {
        self.end_stream(tenant, StreamEnd::Errored(reason.to_string()));
    }

    fn end_stream(&self, tenant: TenantId, end: StreamEnd) {
        let sender = self.update(|state| state.streams.remove(&tenant));
        let sender = sender.unwrap_or_else(|| panic!("guild {tenant} no tiene stream activo"));
        let _ = sender.send(end);
    }

    /// Waits until `check` holds for the recorded state.
    pub async fn wait_until(&self, what: &str, check: impl Fn(&Recorded) -> bool) {
        let mut rx = self.changes.subscribe();
        let reached = tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let done = check(&self.state.lock());
                if done || rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(reached.is_ok(), "timeout esperando: {what}");
    }

    pub async fn wait_for_plays(&self, tenant: TenantId, n: usize) {
        self.wait_until(&format!("{n} reproducciones en {tenant}"), |s| {
            s.plays_for(tenant).len() >= n && s.is_streaming(tenant)
        })
        .await;
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, tenant: TenantId, target: ChannelTarget) -> Result<(), TransportError> {
        self.update(|state| {
            if state.fail_connect {
                return Err(TransportError::Connect("canal inaccesible".to_string()));
            }
            state.connected.insert(tenant);
            state.connects.push((tenant, target));
            Ok(())
        })
    }

    async fn disconnect(&self, tenant: TenantId) -> Result<(), TransportError> {
        let mut open = self.disconnects_open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        let stream = self.update(|state| {
            state.connected.remove(&tenant);
            state.paused.remove(&tenant);
            state.disconnects.push(tenant);
            state.streams.remove(&tenant)
        });
        if let Some(stream) = stream {
            let _ = stream.send(StreamEnd::Finished);
        }
        Ok(())
    }

    async fn is_connected(&self, tenant: TenantId) -> bool {
        self.state.lock().connected.contains(&tenant)
    }

    async fn play(
        &self,
        tenant: TenantId,
        audio: AudioStream,
        on_complete: oneshot::Sender<StreamEnd>,
    ) -> Result<(), TransportError> {
        let mut text = String::new();
        audio
            .into_cursor()
            .read_to_string(&mut text)
            .map_err(|e| TransportError::Stream(e.to_string()))?;

        self.update(|state| {
            if !state.connected.contains(&tenant) {
                return Err(TransportError::NotConnected);
            }
            assert!(
                !state.streams.contains_key(&tenant),
                "dos streams simultáneos en guild {tenant}"
            );
            state.paused.remove(&tenant);
            state.played.push((tenant, text));
            state.streams.insert(tenant, on_complete);
            Ok(())
        })
    }

    fn pause(&self, tenant: TenantId) -> Result<(), TransportError> {
        self.update(|state| {
            if !state.streams.contains_key(&tenant) {
                return Err(TransportError::NoActiveStream);
            }
            state.paused.insert(tenant);
            Ok(())
        })
    }

    fn resume(&self, tenant: TenantId) -> Result<(), TransportError> {
        self.update(|state| {
            if !state.streams.contains_key(&tenant) {
                return Err(TransportError::NoActiveStream);
            }
            state.paused.remove(&tenant);
            Ok(())
        })
    }

    fn stop(&self, tenant: TenantId) -> Result<(), TransportError> {
        let stream = self.update(|state| {
            state.paused.remove(&tenant);
            state.streams.remove(&tenant)
        });
        match stream {
            Some(stream) => {
                let _ = stream.send(StreamEnd::Finished);
                Ok(())
            }
            None => Err(TransportError::NoActiveStream),
        }
    }
}
