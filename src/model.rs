//! # Identifiers
//!
//! Opaque identifiers handed to the core by the front end. Discord snowflakes
//! fit in a `u64`, so every id is a thin newtype over one; the core never
//! interprets them beyond equality and hashing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::OnceLock};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// Isolated unit of playback state (a guild).
    TenantId
);
snowflake!(
    /// Identity of whoever issues a request.
    ActorId
);
snowflake!(
    /// Role that may be granted playback control.
    RoleId
);
snowflake!(
    /// Voice channel the transport connects to.
    ChannelTarget
);

/// Reference to a rendered "now playing" message.
///
/// The core never owns the message: it may be deleted at any time, so every
/// render through a handle must tolerate a missing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UiHandle {
    pub channel: u64,
    pub message: u64,
}

/// Whoever is issuing a control request, as seen by the permission guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub administrator: bool,
    pub roles: Vec<RoleId>,
}

impl Actor {
    pub fn new(id: u64) -> Self {
        Self {
            id: ActorId(id),
            administrator: false,
            roles: Vec::new(),
        }
    }

    pub fn with_administrator(mut self, administrator: bool) -> Self {
        self.administrator = administrator;
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// The bot itself, used for housekeeping such as tearing down a session
    /// after an external voice disconnect.
    pub fn system() -> Self {
        Self::new(0).with_administrator(true)
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// Opaque request string identifying a playable item.
///
/// YouTube links are canonicalised so that `youtu.be/ID`, `watch?v=ID&t=30`
/// and `music.youtube.com/watch?v=ID` all share one cache key. Anything else
/// is kept verbatim (trimmed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(String);

impl SourceId {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(video_id) = youtube_video_id(raw) {
            return Some(Self(format!("https://www.youtube.com/watch?v={video_id}")));
        }

        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_url(&self) -> bool {
        url::Url::parse(&self.0).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn youtube_video_id(raw: &str) -> Option<&str> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|shorts/|embed/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/].*)?$",
            )
            .ok()
        })
        .as_ref()?;

    pattern
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn youtube_links_share_one_key() {
        let canonical = SourceId::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();

        for variant in [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
            "https://www.youtube.com/watch?list=PL123&v=dQw4w9WgXcQ",
            "youtube.com/shorts/dQw4w9WgXcQ",
            "  https://m.youtube.com/watch?v=dQw4w9WgXcQ  ",
        ] {
            assert_eq!(SourceId::parse(variant).unwrap(), canonical, "{variant}");
        }
    }

    #[test]
    fn other_sources_are_kept_verbatim() {
        let id = SourceId::parse(" https://example.com/song.mp3 ").unwrap();
        assert_eq!(id.as_str(), "https://example.com/song.mp3");
        assert!(id.is_url());

        let plain = SourceId::parse("x").unwrap();
        assert_eq!(plain.as_str(), "x");
        assert!(!plain.is_url());
    }

    #[test]
    fn blank_source_is_rejected() {
        assert!(SourceId::parse("   ").is_none());
    }

    #[test]
    fn system_actor_is_administrator() {
        let actor = Actor::system();
        assert!(actor.administrator);
        assert!(!actor.has_role(RoleId(1)));
    }
}
