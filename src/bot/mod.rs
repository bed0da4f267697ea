//! # Bot Module
//!
//! Discord front end for Guild Jukebox.
//!
//! This module contains:
//! - Command registration and handling
//! - Event handling (ready, interactions, voice state updates, guild removal)
//! - Background maintenance tasks
//!
//! ## Architecture
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`] trait and translates
//! every interaction into a call on the [`ControlSurface`]. It never touches
//! queue state or the voice connection directly: playback is owned by the
//! engine, and progress is rendered by the [`DiscordPresenter`] pump.
//!
//! [`DiscordPresenter`]: crate::ui::discord::DiscordPresenter

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{cache::SourceCache, config::Config, control::ControlSurface, model::TenantId};

/// Main Discord bot handler.
///
/// Cheap to share: every field is either an [`Arc`] or the cloneable
/// [`ControlSurface`].
pub struct JukeboxBot {
    config: Arc<Config>,
    /// Request API of the playback engine
    pub control: ControlSurface,
    /// Song cache, only used here for maintenance
    cache: Arc<SourceCache>,
    /// `ready` fires again after every reconnect
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(config: Config, control: ControlSurface, cache: Arc<SourceCache>) -> Self {
        Self {
            config: Arc::new(config),
            control,
            cache,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered per guild when `GUILD_ID` is set (fast
    /// propagation, meant for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    /// Registers commands, preloads the music role of every guild and starts
    /// the maintenance task.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        self.control
            .preload_roles(ready.guilds.iter().map(|guild| TenantId(guild.id.get())).collect::<Vec<_>>())
            .await;

        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let control = self.control.clone();
        let cache = self.cache.clone();
        let period = self.config.maintenance_interval;
        tokio::spawn(async move {
            maintenance_tasks(period, control, cache).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Tears the session down when the bot is disconnected from voice by
    /// someone else.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        let was_connected = old.is_some_and(|state| state.channel_id.is_some());
        if was_connected && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.control.voice_lost(TenantId(guild_id.get())).await;
            }
        }
    }

    /// Drops the cached music role of a guild the bot was removed from.
    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            debug!("Guild {} no disponible temporalmente", incomplete.id);
            return;
        }

        let tenant = TenantId(incomplete.id.get());
        info!("👋 Bot retirado de guild {}", tenant);
        self.control.voice_lost(tenant).await;
        self.control.forget_tenant(tenant).await;
    }
}

/// Runs periodic maintenance tasks in the background.
///
/// - Cache cleanup (drops expired, unreferenced songs)
/// - Engine statistics logging
async fn maintenance_tasks(period: Duration, control: ControlSurface, cache: Arc<SourceCache>) {
    let mut interval = tokio::time::interval(period);
    // El primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;

        cache.cleanup_old_entries();

        match control.stats().await {
            Ok(stats) => info!(
                "📈 {} guilds, {} sesiones activas, {} workers, caché {} canciones / {} descargas ({:.0}% aciertos)",
                stats.tenants,
                stats.active_sessions,
                stats.active_workers,
                stats.cache.entries,
                cache.fetch_count(),
                stats.cache.hit_rate() * 100.0
            ),
            Err(e) => {
                warn!("Motor de reproducción no disponible: {}", e);
                break;
            }
        }

        debug!("🧹 Tareas de mantenimiento completadas");
    }
}
