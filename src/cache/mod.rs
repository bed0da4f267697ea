//! # Cache Module
//!
//! Resolution cache for songs.
//!
//! [`SourceCache`] memoizes successful resolutions keyed by [`SourceId`] and
//! makes resolution single-flight: concurrent callers asking for the same
//! unseen source attach to one shared future instead of starting their own
//! download. A failed resolution is delivered to every waiter of that
//! attempt and then forgotten, so the next request tries again.
//!
//! ## Example
//!
//! ```rust,ignore
//! # use std::sync::Arc;
//! # use crate::{cache::SourceCache, model::SourceId, sources::Resolver};
//! # async fn example(resolver: Arc<dyn Resolver>) {
//! let cache = SourceCache::new(resolver, 64, None);
//! let source = SourceId::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
//!
//! let (a, b) = tokio::join!(cache.resolve(&source), cache.resolve(&source));
//! // una sola descarga, ambos reciben la misma canción
//! assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
//! # }
//! ```

pub mod lru_cache;

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{audio::song::Song, error::ResolveError, model::SourceId, sources::Resolver};
use lru_cache::{CacheMetrics, LRUCache};

type InFlight = Shared<BoxFuture<'static, Result<Arc<Song>, ResolveError>>>;

/// Single-flight, memoizing front for a [`Resolver`].
pub struct SourceCache {
    resolver: Arc<dyn Resolver>,
    songs: Arc<LRUCache<SourceId, Song>>,
    in_flight: Arc<DashMap<SourceId, InFlight>>,
    fetches: AtomicU64,
}

impl SourceCache {
    pub fn new(resolver: Arc<dyn Resolver>, capacity: usize, ttl: Option<Duration>) -> Self {
        info!("🗄️ Cache de canciones iniciado (capacidad {})", capacity);
        Self {
            resolver,
            songs: Arc::new(LRUCache::new(capacity, ttl)),
            in_flight: Arc::new(DashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Returns the cached song for `source`, resolving it if needed.
    ///
    /// At most one resolution per key runs at a time; every concurrent caller
    /// receives the same `Arc<Song>` (or the same error).
    pub async fn resolve(&self, source: &SourceId) -> Result<Arc<Song>, ResolveError> {
        if let Some(song) = self.songs.get(source) {
            debug!("✅ Cache hit: {}", source);
            return Ok(song);
        }

        let flight = match self.in_flight.entry(source.clone()) {
            Entry::Occupied(entry) => {
                debug!("⏳ Esperando resolución en curso: {}", source);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // La resolución anterior pudo terminar entre la consulta y el lock
                if let Some(song) = self.songs.get(source) {
                    return Ok(song);
                }

                self.fetches.fetch_add(1, Ordering::Relaxed);
                let flight = self.start_flight(source.clone());
                entry.insert(flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Runs the resolution on its own task: a waiter that gives up (a skip
    /// during resolution) does not stall the download for the others.
    fn start_flight(&self, source: SourceId) -> InFlight {
        let resolver = self.resolver.clone();
        let songs = self.songs.clone();
        let in_flight = self.in_flight.clone();

        let task = tokio::spawn({
            let source = source.clone();
            let in_flight = in_flight.clone();
            async move {
                debug!("🌐 Resolviendo desde la red: {}", source);
                let result = resolver
                    .resolve(&source)
                    .await
                    .map(|track| Arc::new(Song::new(source.clone(), track)));

                match &result {
                    Ok(song) => {
                        // Guardar antes de liberar la clave: quien llegue después
                        // encuentra la canción en vez de lanzar otra descarga
                        songs.insert(source.clone(), song.clone());
                        info!("💾 Canción en cache: {}", song.title());
                    }
                    Err(e) => warn!("❌ Resolución fallida para {}: {}", source, e),
                }

                in_flight.remove(&source);
                result
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    in_flight.remove(&source);
                    Err(ResolveError::Backend(format!("resolución abortada: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of resolutions started against the resolver.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.songs.metrics()
    }

    /// Performs cache maintenance by removing expired, unreferenced songs.
    pub fn cleanup_old_entries(&self) {
        let removed = self.songs.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeResolver;
    use pretty_assertions::assert_eq;

    fn source(raw: &str) -> SourceId {
        SourceId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn concurrent_resolutions_share_one_fetch() {
        let resolver = Arc::new(FakeResolver::gated());
        let cache = Arc::new(SourceCache::new(resolver.clone(), 8, None));
        let key = source("same-source");

        let first = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            async move { cache.resolve(&key).await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            async move { cache.resolve(&key).await }
        });

        resolver.wait_for_calls(1).await;
        // dar tiempo a que el segundo se enganche a la resolución en curso
        tokio::time::sleep(Duration::from_millis(20)).await;
        resolver.release();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.title(), "same-source");
        assert_eq!(resolver.calls(), 1);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn cached_song_is_not_fetched_again() {
        let resolver = Arc::new(FakeResolver::new());
        let cache = SourceCache::new(resolver.clone(), 8, None);
        let key = source("x");

        let first = cache.resolve(&key).await.unwrap();
        let second = cache.resolve(&key).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls(), 1);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[tokio::test]
    async fn failure_reaches_all_waiters_and_does_not_poison() {
        let resolver = Arc::new(FakeResolver::gated());
        resolver.fail_on("broken");
        let cache = Arc::new(SourceCache::new(resolver.clone(), 8, None));
        let key = source("broken");

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.resolve(&key).await })
            })
            .collect();

        resolver.wait_for_calls(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        resolver.release();

        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Err(ResolveError::NotFound(_))));
        }
        assert_eq!(resolver.calls(), 1);

        // Un nuevo intento vuelve a consultar al resolvedor
        resolver.heal("broken");
        let song = cache.resolve(&key).await.unwrap();
        assert_eq!(song.title(), "broken");
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn different_keys_resolve_independently() {
        let resolver = Arc::new(FakeResolver::new());
        let cache = SourceCache::new(resolver.clone(), 8, None);

        let (source_a, source_b) = (source("a"), source("b"));
        let (a, b) = tokio::join!(cache.resolve(&source_a), cache.resolve(&source_b));

        assert_eq!(a.unwrap().title(), "a");
        assert_eq!(b.unwrap().title(), "b");
        assert_eq!(resolver.calls(), 2);
    }
}
