//! # Sources
//!
//! The [`Resolver`] trait is the boundary to whatever service turns a
//! [`SourceId`] into audio. The core only ever reaches it through the
//! single-flight [`SourceCache`](crate::cache::SourceCache) (for playback) or
//! [`ControlSurface::enqueue_search`](crate::control::ControlSurface::enqueue_search)
//! (for search).

pub mod ytdlp;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::{error::ResolveError, model::SourceId};

pub use ytdlp::YtDlpResolver;

/// Metadata plus fully downloaded audio for one source.
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub title: String,
    pub author: String,
    pub duration: Option<Duration>,
    pub audio: Bytes,
}

/// Trait común para los servicios que resuelven audio
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves and downloads a source. Slow: network bound.
    async fn resolve(&self, source: &SourceId) -> Result<ResolvedTrack, ResolveError>;

    /// First search result for a free-text query, if any.
    async fn search(&self, query: &str) -> Result<Option<SourceId>, ResolveError>;
}
