use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

/// Metadata de un track de Spotify.
#[derive(Debug, Clone)]
pub struct SpotifyTrack {
    pub title: String,
    pub artist: String,
    pub cover: Option<String>,
}

// Estructura del payload __NEXT_DATA__ de la página de embed
#[derive(Debug, Deserialize)]
struct EmbedPayload {
    props: EmbedProps,
}

#[derive(Debug, Deserialize)]
struct EmbedProps {
    #[serde(rename = "pageProps")]
    page_props: PageProps,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    state: EmbedState,
}

#[derive(Debug, Deserialize)]
struct EmbedState {
    data: EmbedData,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    entity: TrackEntity,
}

#[derive(Debug, Deserialize)]
struct TrackEntity {
    name: String,
    #[serde(default)]
    artists: Vec<ArtistEntity>,
    #[serde(rename = "coverArt")]
    cover_art: Option<CoverArt>,
}

#[derive(Debug, Deserialize)]
struct ArtistEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CoverArt {
    #[serde(default)]
    sources: Vec<CoverSource>,
}

#[derive(Debug, Deserialize)]
struct CoverSource {
    url: String,
}

/// Cliente de metadata de Spotify.
///
/// Usa la página pública de embed del track, que incluye el payload JSON
/// con nombre, artistas y carátula. No requiere credenciales de API.
pub struct SpotifyClient {
    http: reqwest::Client,
}

impl SpotifyClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Obtiene título, artista principal y carátula de un track.
    pub async fn track_info(&self, url: &str) -> Result<SpotifyTrack> {
        let track_id = Self::track_id(url)
            .with_context(|| format!("URL de Spotify sin id de track: {}", url))?;

        debug!("📊 Obteniendo metadata de Spotify para track {}", track_id);

        let embed_url = format!("https://open.spotify.com/embed/track/{}", track_id);
        let body = self
            .http
            .get(&embed_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("Error al consultar la página de embed de Spotify")?
            .text()
            .await
            .context("Error al leer la página de embed de Spotify")?;

        Self::parse_embed_page(&body)
    }

    /// Extrae el id de track del path de la URL (`/track/{id}`).
    pub fn track_id(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let mut segments = parsed.path_segments()?;

        while let Some(segment) = segments.next() {
            if segment == "track" {
                let id = segments.next()?;
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
        None
    }

    /// Verifica si una URL pertenece a Spotify.
    pub fn is_spotify_url(url: &str) -> bool {
        url.contains("open.spotify.com")
    }

    fn parse_embed_page(body: &str) -> Result<SpotifyTrack> {
        static NEXT_DATA_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = NEXT_DATA_REGEX.get_or_init(|| {
            Regex::new(r#"(?s)<script id="__NEXT_DATA__" type="application/json">(.*?)</script>"#)
                .expect("regex de __NEXT_DATA__ inválida")
        });

        let raw = regex
            .captures(body)
            .and_then(|c| c.get(1))
            .context("La página de embed no contiene el payload de datos")?
            .as_str();

        let payload: EmbedPayload =
            serde_json::from_str(raw).context("Error al parsear el payload de Spotify")?;
        let entity = payload.props.page_props.state.data.entity;

        let artist = entity
            .artists
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "Unknown Artist".to_string());

        let cover = entity
            .cover_art
            .and_then(|c| c.sources.into_iter().next())
            .map(|s| s.url);

        Ok(SpotifyTrack {
            title: entity.name,
            artist,
            cover,
        })
    }
}
