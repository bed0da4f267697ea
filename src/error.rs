use thiserror::Error;

use crate::audio::queue::PlaybackState;

/// Why a source could not be turned into playable audio.
///
/// `Clone` because one failed single-flight resolution is delivered to every
/// caller waiting on the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no se encontró la fuente: {0}")]
    NotFound(String),
    #[error("la fuente no tiene stream de audio: {0}")]
    NoAudioStream(String),
    #[error("el audio supera el límite de {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("error del resolvedor: {0}")]
    Backend(String),
}

/// Failures reported by the voice transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no se pudo conectar al canal de voz: {0}")]
    Connect(String),
    #[error("tiempo de conexión agotado")]
    Timeout,
    #[error("no hay conexión de voz activa")]
    NotConnected,
    #[error("no hay stream activo")]
    NoActiveStream,
    #[error("error del stream: {0}")]
    Stream(String),
}

/// Outcome of a control request that did not apply.
///
/// Every variant leaves tenant state untouched, and each one is
/// distinguishable so the front end can render a precise reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("no tienes permisos para controlar la reproducción")]
    NotAuthorized,
    #[error("no hay ninguna canción reproduciéndose")]
    NoActivePlayback,
    #[error(transparent)]
    ResolutionFailed(#[from] ResolveError),
    #[error(transparent)]
    TransportUnavailable(#[from] TransportError),
    #[error("no hay canal de voz especificado ni canal por defecto")]
    NoVoiceChannel,
    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },
    #[error("la búsqueda no produjo resultados")]
    NoSearchResults,
    #[error("fuente vacía o inválida")]
    InvalidSource,
    #[error("error de almacenamiento: {0}")]
    Storage(String),
    #[error("el motor de reproducción no está disponible")]
    EngineUnavailable,
}

impl ControlError {
    /// Short stable name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAuthorized => "not_authorized",
            Self::NoActivePlayback => "no_active_playback",
            Self::ResolutionFailed(_) => "resolution_failed",
            Self::TransportUnavailable(_) => "transport_unavailable",
            Self::NoVoiceChannel => "no_voice_channel",
            Self::QueueFull { .. } => "queue_full",
            Self::NoSearchResults => "no_search_results",
            Self::InvalidSource => "invalid_source",
            Self::Storage(_) => "storage",
            Self::EngineUnavailable => "engine_unavailable",
        }
    }
}

/// Result of `pause`/`resume`: asking for the state the tenant is already in
/// is a benign no-op, reported but not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied,
    AlreadyInState(PlaybackState),
}
