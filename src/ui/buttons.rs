use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
    pub const PAUSE: &str = "music_pause";
    pub const RESUME: &str = "music_resume";
}

/// Acción asociada a un botón del reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicButton {
    Skip,
    Stop,
    Pause,
    Resume,
}

impl MusicButton {
    pub fn from_custom_id(id: &str) -> Option<Self> {
        match id {
            button_ids::SKIP => Some(Self::Skip),
            button_ids::STOP => Some(Self::Stop),
            button_ids::PAUSE => Some(Self::Pause),
            button_ids::RESUME => Some(Self::Resume),
            _ => None,
        }
    }

    /// Whether the action waits for the voice disconnect, which can outlast
    /// the interaction deadline. The response must be deferred first.
    pub fn waits_for_disconnect(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Controles del mensaje "reproduciendo ahora"
pub fn player_controls() -> Vec<CreateActionRow> {
    let skip_btn = CreateButton::new(button_ids::SKIP)
        .label("Saltar")
        .emoji('⏭')
        .style(ButtonStyle::Secondary);

    let stop_btn = CreateButton::new(button_ids::STOP)
        .label("Detener")
        .emoji('⏹')
        .style(ButtonStyle::Danger);

    let pause_btn = CreateButton::new(button_ids::PAUSE)
        .label("Pausar")
        .emoji('⏸')
        .style(ButtonStyle::Primary);

    let resume_btn = CreateButton::new(button_ids::RESUME)
        .label("Reanudar")
        .emoji('▶')
        .style(ButtonStyle::Success);

    vec![CreateActionRow::Buttons(vec![
        skip_btn, stop_btn, pause_btn, resume_btn,
    ])]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_ids_round_trip() {
        for (id, button) in [
            (button_ids::SKIP, MusicButton::Skip),
            (button_ids::STOP, MusicButton::Stop),
            (button_ids::PAUSE, MusicButton::Pause),
            (button_ids::RESUME, MusicButton::Resume),
        ] {
            assert_eq!(MusicButton::from_custom_id(id), Some(button));
        }
        assert_eq!(MusicButton::from_custom_id("queue_next"), None);
    }

    #[test]
    fn only_stop_waits_for_disconnect() {
        assert!(MusicButton::Stop.waits_for_disconnect());
        for button in [MusicButton::Skip, MusicButton::Pause, MusicButton::Resume] {
            assert!(!button.waits_for_disconnect());
        }
    }
}
