use async_trait::async_trait;
use serenity::{
    all::{ChannelId, Http, MessageId},
    builder::{CreateEmbed, CreateMessage, EditMessage},
};
use std::{num::NonZeroU64, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    model::UiHandle,
    ui::{buttons, embeds, Presenter},
};

/// Renders playback progress on the guild's "now playing" message.
///
/// The message may be deleted by anyone at any time, so a failed edit is
/// logged and otherwise ignored.
pub struct DiscordPresenter {
    http: Arc<Http>,
}

impl DiscordPresenter {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    async fn edit(&self, handle: UiHandle, builder: EditMessage) {
        let Some((channel, message)) = ids(handle) else {
            return;
        };
        if let Err(e) = channel.edit_message(&*self.http, message, builder).await {
            warn!("⚠️ No se pudo actualizar el mensaje {}: {}", message, e);
        }
    }

    async fn post(&self, handle: UiHandle, embed: CreateEmbed) {
        let Some((channel, _)) = ids(handle) else {
            return;
        };
        if let Err(e) = channel
            .send_message(&*self.http, CreateMessage::new().embed(embed))
            .await
        {
            warn!("⚠️ No se pudo enviar mensaje al canal {}: {}", channel, e);
        }
    }
}

fn ids(handle: UiHandle) -> Option<(ChannelId, MessageId)> {
    let channel = NonZeroU64::new(handle.channel)?;
    let message = NonZeroU64::new(handle.message)?;
    Some((ChannelId::from(channel), MessageId::from(message)))
}

#[async_trait]
impl Presenter for DiscordPresenter {
    async fn now_playing(&self, handle: UiHandle, title: &str, author: &str, duration: Option<Duration>) {
        debug!("🖼️ Reproduciendo ahora: {}", title);
        self.edit(
            handle,
            EditMessage::new()
                .embed(embeds::now_playing(title, author, duration))
                .components(buttons::player_controls()),
        )
        .await;
    }

    async fn queued(&self, handle: UiHandle, title: &str, author: &str, position: usize) {
        self.post(handle, embeds::queued(title, author, position)).await;
    }

    async fn stopped(&self, handle: UiHandle) {
        self.edit(
            handle,
            EditMessage::new().embed(embeds::stopped()).components(Vec::new()),
        )
        .await;
    }

    async fn skipped(&self, handle: UiHandle, remaining: usize) {
        self.edit(handle, EditMessage::new().embed(embeds::skipped(remaining))).await;
    }

    async fn failed(&self, handle: UiHandle, title: &str, reason: &str) {
        self.post(handle, embeds::failed(title, reason)).await;
    }
}
