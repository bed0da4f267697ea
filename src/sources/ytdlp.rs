use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tracing::{debug, error, info, warn};

use super::{ResolvedTrack, Resolver};
use crate::{error::ResolveError, model::SourceId};

/// Resolver que usa yt-dlp para extraer metadata y la URL del stream de
/// audio, y descarga el audio completo en memoria con reqwest.
pub struct YtDlpResolver {
    executable: PathBuf,
    cookies: Option<PathBuf>,
    max_audio_bytes: u64,
    http: reqwest::Client,
}

/// Subconjunto de la salida `--dump-single-json` que necesitamos
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    #[serde(default)]
    is_live: Option<bool>,
}

impl YtDlpResolver {
    pub fn new(executable: PathBuf, cookies: Option<PathBuf>, max_audio_bytes: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            executable,
            cookies,
            max_audio_bytes,
            http,
        })
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify_dependencies(&self) -> Result<()> {
        let output = async_process::Command::new(&self.executable)
            .arg("--version")
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp versión: {}", version.trim());
                Ok(())
            }
            _ => {
                error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
                anyhow::bail!("yt-dlp no disponible");
            }
        }
    }

    fn command(&self) -> async_process::Command {
        let mut cmd = async_process::Command::new(&self.executable);
        cmd.args([
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "--socket-timeout",
            "15",
            "--retries",
            "2",
        ]);

        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd
    }

    async fn run(&self, mut cmd: async_process::Command) -> Result<String, ResolveError> {
        let output = cmd
            .output()
            .await
            .map_err(|e| ResolveError::Backend(format!("no se pudo ejecutar yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn extract_info(&self, source: &SourceId) -> Result<VideoInfo, ResolveError> {
        let mut cmd = self.command();
        cmd.args(["--dump-single-json", "--format", "bestaudio[ext=m4a]/bestaudio/best"]);
        if !source.is_url() {
            cmd.args(["--default-search", "ytsearch"]);
        }
        cmd.arg(source.as_str());

        let stdout = self.run(cmd).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| ResolveError::Backend(format!("respuesta de yt-dlp inválida: {e}")))
    }

    async fn download(&self, url: &str, headers: &HashMap<String, String>) -> Result<Bytes, ResolveError> {
        let mut request = self.http.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ResolveError::Backend(format!("descarga fallida: {e}")))?;

        if response.content_length().is_some_and(|len| len > self.max_audio_bytes) {
            return Err(ResolveError::TooLarge {
                limit: self.max_audio_bytes,
            });
        }

        let mut buffer = BytesMut::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| ResolveError::Backend(format!("descarga interrumpida: {e}")))?;
            if (buffer.len() + chunk.len()) as u64 > self.max_audio_bytes {
                return Err(ResolveError::TooLarge {
                    limit: self.max_audio_bytes,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, source: &SourceId) -> Result<ResolvedTrack, ResolveError> {
        debug!("🔍 Resolviendo {}", source);
        let info = self.extract_info(source).await?;

        if info.is_live == Some(true) {
            return Err(ResolveError::NoAudioStream(format!("{source} es una transmisión en vivo")));
        }

        let stream_url = info
            .url
            .as_deref()
            .ok_or_else(|| ResolveError::NoAudioStream(source.to_string()))?;

        let audio = self.download(stream_url, &info.http_headers).await?;
        if audio.is_empty() {
            return Err(ResolveError::NoAudioStream(source.to_string()));
        }

        let title = info.title.unwrap_or_else(|| source.to_string());
        let author = info
            .uploader
            .or(info.channel)
            .unwrap_or_else(|| "Desconocido".to_string());

        info!("📥 Descargado '{}' de {} ({} KB)", title, author, audio.len() / 1024);

        Ok(ResolvedTrack {
            title,
            author,
            duration: info.duration.filter(|d| d.is_finite() && *d > 0.0).map(Duration::from_secs_f64),
            audio,
        })
    }

    async fn search(&self, query: &str) -> Result<Option<SourceId>, ResolveError> {
        info!("🔍 Buscando: {}", query);

        let mut cmd = self.command();
        cmd.args(["--flat-playlist", "--print", "webpage_url"])
            .arg(format!("ytsearch1:{query}"));

        let stdout = self.run(cmd).await?;
        let first = first_result(&stdout);
        if first.is_none() {
            warn!("🔍 Sin resultados para: {}", query);
        }
        Ok(first)
    }
}

fn first_result(stdout: &str) -> Option<SourceId> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "NA")
        .and_then(SourceId::parse)
}

fn classify_failure(stderr: &str) -> ResolveError {
    let lower = stderr.to_lowercase();
    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("does not exist")
        || lower.contains("404")
    {
        ResolveError::NotFound(stderr.to_string())
    } else if lower.contains("requested format is not available") {
        ResolveError::NoAudioStream(stderr.to_string())
    } else {
        ResolveError::Backend(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn video_info_parses_minimal_json() {
        let json = r#"{
            "title": "Song",
            "uploader": "Band",
            "duration": 183.0,
            "url": "https://cdn.example/audio.webm",
            "http_headers": {"User-Agent": "yt"}
        }"#;

        let info: VideoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.title.as_deref(), Some("Song"));
        assert_eq!(info.uploader.as_deref(), Some("Band"));
        assert_eq!(info.url.as_deref(), Some("https://cdn.example/audio.webm"));
        assert_eq!(info.http_headers.get("User-Agent").map(String::as_str), Some("yt"));
        assert_eq!(info.is_live, None);
    }

    #[test]
    fn first_search_result_skips_blank_lines() {
        let stdout = "\nNA\nhttps://www.youtube.com/watch?v=dQw4w9WgXcQ\nhttps://www.youtube.com/watch?v=aaaaaaaaaaa\n";
        assert_eq!(
            first_result(stdout).unwrap().as_str(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert!(first_result("\n\n").is_none());
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            ResolveError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Requested format is not available"),
            ResolveError::NoAudioStream(_)
        ));
        assert!(matches!(classify_failure("ERROR: timed out"), ResolveError::Backend(_)));
    }
}
