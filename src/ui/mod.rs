//! # UI
//!
//! Rendering of playback progress. The engine emits [`UiEvent`]s in order;
//! [`spawn_pump`] hands them to a [`Presenter`] one at a time, outside the
//! engine task, so a slow or failing render never stalls playback.

pub mod buttons;
pub mod discord;
pub mod embeds;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::model::{TenantId, UiHandle};

/// Render request produced by the engine.
///
/// `handle` is the tenant's "now playing" message at the time of the event,
/// if any. It may already be gone on the Discord side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    NowPlaying {
        tenant: TenantId,
        handle: Option<UiHandle>,
        title: String,
        author: String,
        /// Unknown for live streams
        duration: Option<Duration>,
    },
    Queued {
        tenant: TenantId,
        handle: Option<UiHandle>,
        title: String,
        author: String,
        position: usize,
    },
    Stopped {
        tenant: TenantId,
        handle: Option<UiHandle>,
    },
    Skipped {
        tenant: TenantId,
        handle: Option<UiHandle>,
        remaining: usize,
    },
    Failed {
        tenant: TenantId,
        handle: Option<UiHandle>,
        title: String,
        reason: String,
    },
}

/// Consumer of render requests. Implementations must tolerate stale or
/// missing handles without failing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn now_playing(&self, handle: UiHandle, title: &str, author: &str, duration: Option<Duration>);

    async fn queued(&self, handle: UiHandle, title: &str, author: &str, position: usize);

    async fn stopped(&self, handle: UiHandle);

    async fn skipped(&self, handle: UiHandle, remaining: usize);

    async fn failed(&self, handle: UiHandle, title: &str, reason: &str);
}

/// Forwards events to `presenter` in emission order until the sender side
/// closes. Events for tenants without a UI handle are dropped.
pub fn spawn_pump(presenter: Arc<dyn Presenter>, mut events: mpsc::UnboundedReceiver<UiEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render(presenter.as_ref(), event).await;
        }
        debug!("Canal de UI cerrado");
    })
}

async fn render(presenter: &dyn Presenter, event: UiEvent) {
    match event {
        UiEvent::NowPlaying {
            handle: Some(handle),
            title,
            author,
            duration,
            ..
        } => presenter.now_playing(handle, &title, &author, duration).await,
        UiEvent::Queued {
            handle: Some(handle),
            title,
            author,
            position,
            ..
        } => presenter.queued(handle, &title, &author, position).await,
        UiEvent::Stopped {
            handle: Some(handle), ..
        } => presenter.stopped(handle).await,
        UiEvent::Skipped {
            handle: Some(handle),
            remaining,
            ..
        } => presenter.skipped(handle, remaining).await,
        UiEvent::Failed {
            handle: Some(handle),
            title,
            reason,
            ..
        } => presenter.failed(handle, &title, &reason).await,
        other => debug!("Evento de UI sin mensaje asociado: {:?}", other),
    }
}
