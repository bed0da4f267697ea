use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::queue::{PlaybackState, TenantStatus},
    error::{ControlError, ResolveError, ToggleOutcome, TransportError},
    model::RoleId,
};

/// Paleta de colores del bot
pub mod colors {
    use serenity::all::Colour;

    pub const PLAYING_GREEN: Colour = Colour::new(0x2ebd3f);
    pub const ERROR_RED: Colour = Colour::new(0xb90505);
    pub const INFO_CYAN: Colour = Colour::new(0x16acac);
    pub const WARNING_YELLOW: Colour = Colour::new(0xffeb00);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Cuántos títulos de la cola se muestran como máximo
const QUEUE_PREVIEW: usize = 15;

fn base(title: impl Into<String>, colour: serenity::all::Colour) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .color(colour)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed del mensaje "reproduciendo ahora"
pub fn now_playing(title: &str, author: &str, duration: Option<Duration>) -> CreateEmbed {
    base("🎶 Reproduciendo ahora", colors::PLAYING_GREEN)
        .description(format!("**{}**", title))
        .field("🎤 Autor", author, true)
        .field("⏱️ Duración", format_duration(duration), true)
}

/// Embed para una canción agregada detrás de la actual
pub fn queued(title: &str, author: &str, position: usize) -> CreateEmbed {
    base("🎵 Canción agregada", colors::INFO_CYAN)
        .description(format!("**{}**", title))
        .field("🎤 Autor", author, true)
        .field("📋 Posición en la cola", position.to_string(), true)
}

/// Respuesta inmediata a `/play` cuando la canción aún no se ha resuelto
pub fn enqueue_accepted(source: &str, position: Option<usize>) -> CreateEmbed {
    match position {
        None => base("⏳ Preparando reproducción", colors::PLAYING_GREEN).description(source.to_string()),
        Some(position) => base("🎵 Canción agregada", colors::INFO_CYAN)
            .description(source.to_string())
            .field("📋 Posición en la cola", position.to_string(), true),
    }
}

pub fn stopped() -> CreateEmbed {
    base("⏹️ Reproducción detenida", colors::ERROR_RED)
        .description("La cola se vació y el bot salió del canal de voz")
}

pub fn skipped(remaining: usize) -> CreateEmbed {
    base("⏭️ Canción saltada", colors::INFO_CYAN)
        .description(format!("Quedan {} canciones en la cola", remaining))
}

pub fn failed(title: &str, reason: &str) -> CreateEmbed {
    base("❌ No se pudo reproducir", colors::ERROR_RED)
        .description(format!("**{}**", title))
        .field("Motivo", reason, false)
}

pub fn paused(outcome: ToggleOutcome) -> CreateEmbed {
    match outcome {
        ToggleOutcome::Applied => base("⏸️ Canción pausada", colors::WARNING_YELLOW),
        ToggleOutcome::AlreadyInState(_) => {
            base("⏸️ La canción ya está pausada", colors::WARNING_YELLOW)
        }
    }
}

pub fn resumed(outcome: ToggleOutcome) -> CreateEmbed {
    match outcome {
        ToggleOutcome::Applied => base("▶️ Reproducción reanudada", colors::PLAYING_GREEN),
        ToggleOutcome::AlreadyInState(_) => {
            base("▶️ La canción ya se está reproduciendo", colors::PLAYING_GREEN)
        }
    }
}

/// Estado de la cola de un servidor
pub fn queue(status: &TenantStatus) -> CreateEmbed {
    let mut embed = base("📋 Cola de reproducción", colors::INFO_CYAN);

    embed = match (&status.now_playing, status.state) {
        (Some(title), PlaybackState::Paused) => embed.field("⏸️ En pausa", title, false),
        (Some(title), _) => embed.field("🎶 Sonando", title, false),
        (None, PlaybackState::Idle) => embed.description("No hay ninguna canción en reproducción"),
        (None, state) => embed.field("⏳ Estado", state.to_string(), false),
    };

    if status.pending.is_empty() {
        return embed.field("Siguientes", "La cola está vacía", false);
    }

    let mut listing = status
        .pending
        .iter()
        .take(QUEUE_PREVIEW)
        .enumerate()
        .map(|(i, title)| format!("`{}.` {}", i + 1, title))
        .collect::<Vec<_>>()
        .join("\n");
    if status.pending.len() > QUEUE_PREVIEW {
        listing.push_str(&format!("\n… y {} más", status.pending.len() - QUEUE_PREVIEW));
    }

    embed.field(format!("Siguientes ({})", status.pending.len()), listing, false)
}

pub fn music_role_set(role: RoleId) -> CreateEmbed {
    base("🎧 Rol de música configurado", colors::PLAYING_GREEN)
        .description(format!("Los miembros con <@&{}> pueden controlar la música", role))
}

pub fn music_role(role: Option<RoleId>) -> CreateEmbed {
    match role {
        Some(role) => base("🎧 Rol de música", colors::INFO_CYAN)
            .description(format!("El rol de música es <@&{}>", role)),
        None => base("🎧 Rol de música", colors::WARNING_YELLOW)
            .description("No hay rol de música configurado. Usa `/musicrole` para elegir uno"),
    }
}

/// Embed de error para un resultado de control que no se aplicó
pub fn control_error(error: &ControlError) -> CreateEmbed {
    let (title, description) = describe(error);
    base(format!("❌ {}", title), colors::ERROR_RED).description(description)
}

/// Título y descripción de cada resultado fallido
pub fn describe(error: &ControlError) -> (&'static str, String) {
    match error {
        ControlError::NotAuthorized => (
            "Permisos insuficientes",
            "Necesitas ser administrador, haber iniciado la sesión o tener el rol de música".to_string(),
        ),
        ControlError::NoActivePlayback => ("Sin reproducción", "No hay ninguna canción sonando".to_string()),
        ControlError::ResolutionFailed(ResolveError::TooLarge { .. }) => {
            ("Canción demasiado grande", error.to_string())
        }
        ControlError::ResolutionFailed(_) => ("No se pudo obtener el audio", error.to_string()),
        ControlError::TransportUnavailable(TransportError::Timeout) => (
            "Canal de voz",
            "La conexión al canal de voz tardó demasiado".to_string(),
        ),
        ControlError::TransportUnavailable(_) => ("Canal de voz", error.to_string()),
        ControlError::NoVoiceChannel => (
            "Canal de voz",
            "Indica un canal de voz o entra en uno antes de usar el comando".to_string(),
        ),
        ControlError::QueueFull { .. } => ("Cola llena", error.to_string()),
        ControlError::NoSearchResults => ("Sin resultados", "La búsqueda no encontró canciones".to_string()),
        ControlError::InvalidSource => ("Fuente inválida", "Indica un enlace o una búsqueda".to_string()),
        ControlError::Storage(_) => ("Error interno", "No se pudo guardar la configuración".to_string()),
        ControlError::EngineUnavailable => ("Error interno", "El reproductor no está disponible".to_string()),
    }
}

fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return "En vivo".to_string();
    };
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn durations_read_like_a_clock() {
        assert_eq!(format_duration(Some(Duration::from_secs(212))), "3:32");
        assert_eq!(format_duration(Some(Duration::from_secs(3725))), "1:02:05");
        assert_eq!(format_duration(Some(Duration::ZERO)), "0:00");
        assert_eq!(format_duration(None), "En vivo");
    }

    #[test]
    fn describe_hides_storage_details() {
        let (title, description) = describe(&ControlError::Storage("disk full at /app/data".into()));
        assert_eq!(title, "Error interno");
        assert!(!description.contains("/app/data"));
    }

    #[test]
    fn describe_distinguishes_authorization() {
        let (denied, _) = describe(&ControlError::NotAuthorized);
        let (idle, _) = describe(&ControlError::NoActivePlayback);
        assert_ne!(denied, idle);
    }

    #[test]
    fn queue_full_mentions_limit() {
        let (_, description) = describe(&ControlError::QueueFull { max: 100 });
        assert!(description.contains("100"));
    }
}
