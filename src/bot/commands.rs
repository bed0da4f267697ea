use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, channel::ChannelType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        search_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        musicrole_command(),
        whatrole_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn voice_channel_option(required: bool) -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::Channel,
        "channel",
        "Canal de voz donde reproducir",
    )
    .channel_types(vec![ChannelType::Voice, ChannelType::Stage])
    .required(required)
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción desde un enlace")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "video", "Enlace de la canción")
                .required(true),
        )
        .add_option(voice_channel_option(false))
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Busca una canción y reproduce el primer resultado")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Término de búsqueda")
                .required(true),
        )
        .add_option(voice_channel_option(false))
}

// Comandos de control

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y vacía la cola")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

// Configuración

fn musicrole_command() -> CreateCommand {
    CreateCommand::new("musicrole")
        .description("Define el rol que puede controlar la música")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Role, "role", "Rol de música")
                .required(true),
        )
}

fn whatrole_command() -> CreateCommand {
    CreateCommand::new("whatrole").description("Muestra el rol de música actual")
}
