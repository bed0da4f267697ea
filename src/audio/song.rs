use bytes::Bytes;
use std::{io::Cursor, time::Duration};

use crate::{model::SourceId, sources::ResolvedTrack};

/// A resolved, immutable song.
///
/// Created by the source cache on first resolution and shared read-only
/// (`Arc<Song>`) afterwards. The audio lives in a reference-counted buffer so
/// every playback gets its own cursor without copying the bytes.
#[derive(Debug)]
pub struct Song {
    source: SourceId,
    title: String,
    author: String,
    duration: Option<Duration>,
    audio: Bytes,
}

impl Song {
    pub fn new(source: SourceId, track: ResolvedTrack) -> Self {
        Self {
            source,
            title: track.title,
            author: track.author,
            duration: track.duration,
            audio: track.audio,
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn size_bytes(&self) -> usize {
        self.audio.len()
    }

    /// Fresh stream over the cached bytes, positioned at the start.
    pub fn stream(&self) -> AudioStream {
        AudioStream {
            cursor: Cursor::new(self.audio.clone()),
        }
    }
}

/// Readable audio handed to the transport for one playback.
#[derive(Debug)]
pub struct AudioStream {
    cursor: Cursor<Bytes>,
}

impl AudioStream {
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn into_cursor(self) -> Cursor<Bytes> {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn each_stream_starts_from_the_beginning() {
        let song = Song::new(
            SourceId::parse("x").unwrap(),
            ResolvedTrack {
                title: "Título".into(),
                author: "Autor".into(),
                duration: None,
                audio: Bytes::from_static(b"abcdef"),
            },
        );

        let mut first = song.stream().into_cursor();
        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        let mut second = String::new();
        song.stream().into_cursor().read_to_string(&mut second).unwrap();
        assert_eq!(second, "abcdef");
        assert_eq!(song.size_bytes(), 6);
    }
}
