use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        guild::Member,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use crate::{
    audio::engine::EnqueueReceipt,
    bot::JukeboxBot,
    error::ControlError,
    model::{Actor, ChannelTarget, RoleId, TenantId, UiHandle},
    ui::{
        buttons::{self, MusicButton},
        embeds,
    },
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let tenant = TenantId(guild_id.get());
    let actor = actor_of(command.user.id, command.member.as_deref());

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id, &actor).await?,
        "search" => handle_search(ctx, &command, bot, guild_id, &actor).await?,
        "pause" => {
            let embed = match bot.control.pause(&actor, tenant).await {
                Ok(outcome) => embeds::paused(outcome),
                Err(e) => rejected(&command.data.name, tenant, &e),
            };
            respond(ctx, &command, embed).await?;
        }
        "resume" => {
            let embed = match bot.control.resume(&actor, tenant).await {
                Ok(outcome) => embeds::resumed(outcome),
                Err(e) => rejected(&command.data.name, tenant, &e),
            };
            respond(ctx, &command, embed).await?;
        }
        "skip" => {
            let embed = match bot.control.skip(&actor, tenant).await {
                Ok(remaining) => embeds::skipped(remaining),
                Err(e) => rejected(&command.data.name, tenant, &e),
            };
            respond(ctx, &command, embed).await?;
        }
        "stop" => {
            // La desconexión puede tardar
            defer(ctx, &command).await?;
            let embed = match bot.control.stop(&actor, tenant).await {
                Ok(()) => embeds::stopped(),
                Err(e) => rejected(&command.data.name, tenant, &e),
            };
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await?;
        }
        "queue" => {
            let embed = match bot.control.status(tenant).await {
                Ok(status) => embeds::queue(&status),
                Err(e) => rejected(&command.data.name, tenant, &e),
            };
            respond(ctx, &command, embed).await?;
        }
        "musicrole" => {
            let embed = match role_option(&command) {
                Some(role) => match bot.control.set_music_role(&actor, tenant, role).await {
                    Ok(()) => embeds::music_role_set(role),
                    Err(e) => rejected(&command.data.name, tenant, &e),
                },
                None => embeds::control_error(&ControlError::InvalidSource),
            };
            respond(ctx, &command, embed).await?;
        }
        "whatrole" => {
            let role = bot.control.music_role(tenant).await;
            respond(ctx, &command, embeds::music_role(role)).await?;
        }
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

/// Maneja los botones del mensaje "reproduciendo ahora"
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let tenant = TenantId(guild_id.get());
    let actor = actor_of(component.user.id, component.member.as_ref());
    let name = component.data.custom_id.as_str();

    let button = MusicButton::from_custom_id(name);
    let deferred = button.is_some_and(MusicButton::waits_for_disconnect);
    if deferred {
        component
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
            )
            .await?;
    }

    let embed = match button {
        Some(MusicButton::Skip) => match bot.control.skip(&actor, tenant).await {
            Ok(remaining) => embeds::skipped(remaining),
            Err(e) => rejected(name, tenant, &e),
        },
        Some(MusicButton::Stop) => match bot.control.stop(&actor, tenant).await {
            Ok(()) => embeds::stopped(),
            Err(e) => rejected(name, tenant, &e),
        },
        Some(MusicButton::Pause) => match bot.control.pause(&actor, tenant).await {
            Ok(outcome) => embeds::paused(outcome),
            Err(e) => rejected(name, tenant, &e),
        },
        Some(MusicButton::Resume) => match bot.control.resume(&actor, tenant).await {
            Ok(outcome) => embeds::resumed(outcome),
            Err(e) => rejected(name, tenant, &e),
        },
        None => {
            warn!("Botón desconocido: {}", name);
            embeds::control_error(&ControlError::InvalidSource)
        }
    };

    // El mensaje del reproductor lo actualiza el presenter; aquí solo se
    // responde a quien pulsó
    if deferred {
        component
            .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
            .await?;
    } else {
        component
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .embed(embed)
                        .ephemeral(true),
                ),
            )
            .await?;
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    actor: &Actor,
) -> Result<()> {
    let video = string_option(command, "video")
        .ok_or_else(|| anyhow::anyhow!("Enlace no proporcionado"))?;

    // Defer la respuesta ya que puede tomar tiempo
    defer(ctx, command).await?;

    let channel = target_channel(ctx, command, guild_id);
    let result = bot
        .control
        .enqueue(actor, TenantId(guild_id.get()), video, channel)
        .await;

    finish_enqueue(ctx, command, bot, guild_id, video, result).await
}

async fn handle_search(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    actor: &Actor,
) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Búsqueda no proporcionada"))?;

    defer(ctx, command).await?;

    let channel = target_channel(ctx, command, guild_id);
    let result = bot
        .control
        .enqueue_search(actor, TenantId(guild_id.get()), query, channel)
        .await;

    finish_enqueue(ctx, command, bot, guild_id, query, result).await
}

/// Responde a `/play` o `/search` y, si arrancó una sesión nueva, registra
/// la respuesta como mensaje del reproductor.
async fn finish_enqueue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    requested: &str,
    result: Result<EnqueueReceipt, ControlError>,
) -> Result<()> {
    let tenant = TenantId(guild_id.get());

    match result {
        Ok(EnqueueReceipt::Started) => {
            let message = command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .embed(embeds::enqueue_accepted(requested, None))
                        .components(buttons::player_controls()),
                )
                .await?;

            let handle = UiHandle {
                channel: message.channel_id.get(),
                message: message.id.get(),
            };
            match bot.control.attach_ui(tenant, handle).await {
                Ok(true) => debug!("🖼️ Mensaje {} asociado a guild {}", message.id, tenant),
                Ok(false) => debug!("La sesión de guild {} terminó antes de asociar el mensaje", tenant),
                Err(e) => warn!("⚠️ No se pudo asociar el mensaje en guild {}: {}", tenant, e),
            }
        }
        Ok(EnqueueReceipt::Appended { position }) => {
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().embed(embeds::enqueue_accepted(requested, Some(position))),
                )
                .await?;
        }
        Err(e) => {
            let embed = rejected(&command.data.name, tenant, &e);
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await?;
        }
    }

    Ok(())
}

/// Identidad y permisos de quien usa un comando
pub fn actor_of(user: UserId, member: Option<&Member>) -> Actor {
    let actor = Actor::new(user.get());
    match member {
        Some(member) => actor
            .with_administrator(member.permissions.is_some_and(|p| p.administrator()))
            .with_roles(member.roles.iter().map(|role| RoleId(role.get()))),
        None => actor,
    }
}

fn rejected(command: &str, tenant: TenantId, error: &ControlError) -> CreateEmbed {
    debug!(
        "🚫 /{} rechazado en guild {}: {} ({})",
        command,
        tenant,
        error,
        error.kind()
    );
    embeds::control_error(error)
}

/// Canal indicado en el comando, o el canal de voz de quien lo usa
fn target_channel(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Option<ChannelTarget> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "channel")
        .and_then(|opt| opt.value.as_channel_id())
        .or_else(|| user_voice_channel(ctx, guild_id, command.user.id))
        .map(|channel| ChannelTarget(channel.get()))
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn role_option(command: &CommandInteraction) -> Option<RoleId> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "role")
        .and_then(|opt| opt.value.as_role_id())
        .map(|role| RoleId(role.get()))
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn respond(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}
