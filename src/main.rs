use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod control;
mod error;
mod model;
mod permissions;
mod sources;
mod storage;
mod ui;

use crate::audio::{engine::PlaybackEngine, songbird_transport::SongbirdTransport};
use crate::bot::JukeboxBot;
use crate::cache::SourceCache;
use crate::config::Config;
use crate::permissions::RoleRegistry;
use crate::sources::YtDlpResolver;
use crate::storage::JsonRoleStore;
use crate::ui::discord::DiscordPresenter;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let resolver = Arc::new(YtDlpResolver::new(
        config.ytdlp_path.clone(),
        config.ytdlp_cookies.clone(),
        config.max_audio_bytes,
    )?);

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        resolver.verify_dependencies().await?;
        println!("OK");
        return Ok(());
    }

    if let Err(e) = resolver.verify_dependencies().await {
        warn!("⚠️ {:?}", e);
    }

    // Roles de música persistidos
    let store = Arc::new(JsonRoleStore::new(config.data_dir.clone()).await?);
    let stored_guilds = store.list_guilds().await?;
    let roles = Arc::new(RoleRegistry::new(store));
    roles.preload(stored_guilds).await;

    // Caché de canciones resueltas
    let cache = Arc::new(SourceCache::new(
        resolver.clone(),
        config.source_cache_size,
        config.source_cache_ttl,
    ));

    // Motor de reproducción
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone()));
    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let (control, engine) = PlaybackEngine::spawn(
        config.engine_settings(),
        cache.clone(),
        transport,
        resolver,
        roles,
        ui_tx,
    );

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), control, cache);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let presenter = Arc::new(DiscordPresenter::new(client.http.clone()));
    let pump = ui::spawn_pump(presenter, ui_rx);

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    engine.abort();
    pump.abort();

    info!("👋 Guild Jukebox detenido");
    Ok(())
}
