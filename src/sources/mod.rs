//! # Sources Module
//!
//! URL resolution for the playback engine. A submitted URL is classified
//! once into a [`SourceKind`] and turned into a canonical [`Song`]:
//!
//! - YouTube URLs are looked up directly (yt-dlp metadata).
//! - Spotify URLs are resolved via the track's public embed metadata and
//!   then matched to the best YouTube search hit, which becomes the
//!   playable reference.
//!
//! Resolution performs no retries; a failed resolution is reported to the
//! caller and leaves the player untouched.

pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::audio::transport::AudioInput;
use crate::error::{ResolveError, TransportError};

pub use spotify::SpotifyClient;
pub use youtube::YouTubeClient;

/// Proveedor de origen de una canción.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    YouTube,
    Spotify,
}

impl SourceKind {
    /// Clasifica una URL una sola vez, a la entrada de la resolución.
    pub fn classify(url: &str) -> Option<Self> {
        if SpotifyClient::is_spotify_url(url) {
            Some(SourceKind::Spotify)
        } else if YouTubeClient::is_youtube_url(url) {
            Some(SourceKind::YouTube)
        } else {
            None
        }
    }

    #[allow(dead_code)]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Spotify => "spotify",
        }
    }
}

/// Canción resuelta, lista para reproducir. Inmutable una vez creada.
#[derive(Debug, Clone, Serialize)]
pub struct Song {
    pub title: String,
    pub artist: String,
    pub source: SourceKind,
    /// Referencia reproducible (URL de video resoluble a un stream de audio).
    pub url: String,
    /// URL original enviada por el usuario.
    pub original_url: String,
    /// Duración en segundos, si se conoce.
    pub duration: Option<u64>,
    pub thumbnail: Option<String>,
}

/// Seam de resolución que consume el controlador de reproducción.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SongResolver: Send + Sync {
    /// Convierte una URL en una [`Song`] canónica.
    async fn resolve(&self, url: &str) -> Result<Song, ResolveError>;

    /// Abre el stream de audio comprimido de una canción ya resuelta.
    async fn open_audio_stream(&self, song: &Song) -> Result<AudioInput, TransportError>;
}

/// Resolutor de producción: despacha según el proveedor detectado.
pub struct SourceResolver {
    youtube: YouTubeClient,
    spotify: SpotifyClient,
    http: reqwest::Client,
}

impl SourceResolver {
    pub fn new() -> Self {
        Self {
            youtube: YouTubeClient::new(),
            spotify: SpotifyClient::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Resuelve una URL de Spotify: metadata del track + búsqueda en YouTube.
    async fn resolve_spotify(&self, url: &str) -> Result<Song, ResolveError> {
        let track = self
            .spotify
            .track_info(url)
            .await
            .map_err(|e| ResolveError::MetadataFetchFailed(e.to_string()))?;

        let query = format!("{} {}", track.title, track.artist);
        info!("🔍 Buscando en YouTube: {}", query);

        let hit = self
            .youtube
            .search_one(&query)
            .await
            .map_err(|e| ResolveError::MetadataFetchFailed(e.to_string()))?
            .ok_or_else(|| ResolveError::NoSearchResult(query.clone()))?;

        Ok(Song {
            title: track.title,
            artist: track.artist,
            source: SourceKind::Spotify,
            url: hit.url,
            original_url: url.to_string(),
            duration: hit.duration_secs,
            // Preferir la carátula de Spotify; si no hay, la miniatura del video
            thumbnail: track.cover.or(hit.thumbnail),
        })
    }

    /// Resuelve una URL de YouTube con una consulta directa de metadata.
    async fn resolve_youtube(&self, url: &str) -> Result<Song, ResolveError> {
        let meta = self
            .youtube
            .video_info(url)
            .await
            .map_err(|e| ResolveError::MetadataFetchFailed(e.to_string()))?;

        Ok(Song {
            title: meta.title,
            artist: meta.artist.unwrap_or_else(|| "Unknown Artist".to_string()),
            source: SourceKind::YouTube,
            url: meta.url,
            original_url: url.to_string(),
            duration: meta.duration_secs,
            thumbnail: meta.thumbnail,
        })
    }
}

#[async_trait]
impl SongResolver for SourceResolver {
    async fn resolve(&self, url: &str) -> Result<Song, ResolveError> {
        match SourceKind::classify(url) {
            Some(SourceKind::Spotify) => self.resolve_spotify(url).await,
            Some(SourceKind::YouTube) => self.resolve_youtube(url).await,
            None => Err(ResolveError::UnsupportedUrl(url.to_string())),
        }
    }

    async fn open_audio_stream(&self, song: &Song) -> Result<AudioInput, TransportError> {
        let stream_url = self
            .youtube
            .stream_url(&song.url)
            .await
            .map_err(|e| TransportError::StreamFailed(e.to_string()))?;

        debug!("🎵 Abriendo stream de audio para: {}", song.title);

        let response = self
            .http
            .get(&stream_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::StreamFailed(e.to_string()))?;

        let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(Box::new(StreamReader::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_spotify() {
        assert_eq!(
            SourceKind::classify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            Some(SourceKind::Spotify)
        );
    }

    #[test]
    fn test_classify_youtube() {
        assert_eq!(
            SourceKind::classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some(SourceKind::YouTube)
        );
        assert_eq!(
            SourceKind::classify("https://youtu.be/dQw4w9WgXcQ"),
            Some(SourceKind::YouTube)
        );
    }

    #[test]
    fn test_classify_unsupported() {
        assert_eq!(SourceKind::classify("https://example.com/video"), None);
        assert_eq!(SourceKind::classify("not a url"), None);
    }
}
