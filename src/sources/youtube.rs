use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::debug;

/// Metadata de un video obtenida de yt-dlp.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    /// URL canónica del video (la referencia reproducible).
    pub url: String,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: String,
}

impl From<YtDlpInfo> for VideoMetadata {
    fn from(info: YtDlpInfo) -> Self {
        Self {
            title: info.title,
            artist: info.uploader,
            duration_secs: info.duration.map(|d| d as u64),
            thumbnail: info.thumbnail,
            url: info.webpage_url,
        }
    }
}

/// Cliente para interactuar con YouTube vía yt-dlp
pub struct YouTubeClient {
    // Limitar consultas concurrentes para evitar rate limiting
    rate_limiter: tokio::sync::Semaphore,
}

impl YouTubeClient {
    pub fn new() -> Self {
        Self {
            rate_limiter: tokio::sync::Semaphore::new(3),
        }
    }

    /// Obtiene la metadata de una URL de video específica.
    pub async fn video_info(&self, url: &str) -> Result<VideoMetadata> {
        let _permit = self.rate_limiter.acquire().await?;

        debug!("📊 Obteniendo info de: {}", url);

        let output = Command::new("yt-dlp")
            .args(["--no-playlist", "--dump-json", "--no-warnings", url])
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info: YtDlpInfo =
            serde_json::from_str(stdout.trim()).context("Error al parsear respuesta de yt-dlp")?;

        Ok(info.into())
    }

    /// Busca el mejor resultado de video para una consulta (límite 1).
    pub async fn search_one(&self, query: &str) -> Result<Option<VideoMetadata>> {
        let _permit = self.rate_limiter.acquire().await?;

        let search_query = format!("ytsearch1:{}", query);

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "--dump-json",
                "--no-warnings",
                &search_query,
            ])
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout
            .lines()
            .find_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok());

        Ok(first.map(Into::into))
    }

    /// Obtiene la URL directa del mejor stream de audio.
    pub async fn stream_url(&self, url: &str) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        debug!("🎵 Obteniendo URL de stream para: {}", url);

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--get-url",
                "--no-warnings",
                url,
            ])
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        let stream_url = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if stream_url.is_empty() {
            anyhow::bail!("No se pudo obtener URL de stream");
        }

        Ok(stream_url)
    }

    /// Verifica si una URL pertenece a YouTube.
    pub fn is_youtube_url(url: &str) -> bool {
        static YOUTUBE_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = YOUTUBE_REGEX.get_or_init(|| {
            Regex::new(
                r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/)|youtu\.be/|music\.youtube\.com/)",
            )
            .expect("regex de YouTube inválida")
        });

        regex.is_match(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YouTubeClient::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YouTubeClient::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(!YouTubeClient::is_youtube_url("https://example.com/video"));
        assert!(!YouTubeClient::is_youtube_url(
            "https://open.spotify.com/track/abc"
        ));
    }

    #[test]
    fn test_ytdlp_info_parse() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration": 212.0,
            "uploader": "Rick Astley",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hq720.jpg",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        }"#;

        let meta: VideoMetadata = serde_json::from_str::<YtDlpInfo>(json).unwrap().into();
        assert_eq!(meta.title, "Never Gonna Give You Up");
        assert_eq!(meta.artist.as_deref(), Some("Rick Astley"));
        assert_eq!(meta.duration_secs, Some(212));
        assert_eq!(meta.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_ytdlp_info_parse_missing_optionals() {
        let json = r#"{"title": "Sin datos", "webpage_url": "https://youtu.be/x"}"#;
        let meta: VideoMetadata = serde_json::from_str::<YtDlpInfo>(json).unwrap().into();
        assert!(meta.artist.is_none());
        assert!(meta.duration_secs.is_none());
        assert!(meta.thumbnail.is_none());
    }
}
