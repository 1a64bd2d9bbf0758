use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

mod api;
mod audio;
mod config;
mod error;
mod sources;
mod voice;

use crate::api::AppState;
use crate::audio::events::{EventBus, PlayerEvent};
use crate::audio::player::{FrameSink, PlaybackController};
use crate::audio::transport::{FfmpegBridge, TransportBridge};
use crate::config::Config;
use crate::sources::{SongResolver, SourceResolver};
use crate::voice::ServerQueryClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ts_music_bot=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando TS3 Music Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Wiring de componentes
    let voice = Arc::new(ServerQueryClient::new(&config));
    let player = PlaybackController::new(
        Arc::new(SourceResolver::new()) as Arc<dyn SongResolver>,
        Arc::new(FfmpegBridge::new(config.transcoder_path.clone())) as Arc<dyn TransportBridge>,
        voice.clone() as Arc<dyn FrameSink>,
        EventBus::default(),
        config.default_volume,
    );

    // Log de eventos del reproductor
    let mut event_rx = player.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(PlayerEvent::SongStart(song)) => {
                    info!("🎵 Sonando: {} - {}", song.title, song.artist);
                }
                Ok(PlayerEvent::PlaybackEnd) => info!("⏹️ Reproducción finalizada"),
                Ok(PlayerEvent::QueueUpdate(status)) => {
                    debug!("📋 Cola: {} canciones", status.queue_length);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Conectar a TeamSpeak
    voice
        .connect()
        .await
        .context("No se pudo conectar a TeamSpeak")?;

    // Servir la API de control
    let state = AppState {
        player: player.clone(),
        voice: voice.clone(),
    };
    let addr = format!("0.0.0.0:{}", config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", addr))?;
    info!("🚀 API disponible en http://localhost:{}", config.api_port);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown ordenado
    info!("🛑 Cerrando...");
    player.stop().await;
    voice.disconnect().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
