use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::audio::events::{EventBus, PlayerEvent};
use crate::audio::queue::SongQueue;
use crate::audio::transport::{SessionEnd, TransportBridge, TransportSession};
use crate::error::{ResolveError, TransportError};
use crate::sources::{Song, SongResolver};

/// Estado del motor de reproducción.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Snapshot serializable del estado completo del reproductor.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub current_song: Option<Song>,
    pub queue: Vec<Song>,
    pub queue_length: usize,
    pub volume: u8,
}

/// Destino de los frames PCM de la sesión activa (el cliente de voz).
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn play(&self, song: Song, frames: mpsc::Receiver<Bytes>);
}

// Estado mutable con dueño único: solo el controlador lo toca, siempre
// bajo el mismo lock. CurrentItem nunca está también en la cola.
struct PlayerCore {
    state: PlaybackState,
    queue: SongQueue,
    current: Option<(Song, TransportSession)>,
    volume: u8,
}

/// Controlador de reproducción: orquesta resolutor, cola y puente de
/// transporte, e implementa la máquina de estados Idle/Playing/Paused.
pub struct PlaybackController {
    core: Mutex<PlayerCore>,
    events: EventBus,
    resolver: Arc<dyn SongResolver>,
    bridge: Arc<dyn TransportBridge>,
    sink: Arc<dyn FrameSink>,
}

impl PlaybackController {
    pub fn new(
        resolver: Arc<dyn SongResolver>,
        bridge: Arc<dyn TransportBridge>,
        sink: Arc<dyn FrameSink>,
        events: EventBus,
        default_volume: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(PlayerCore {
                state: PlaybackState::Idle,
                queue: SongQueue::new(),
                current: None,
                volume: default_volume.min(100),
            }),
            events,
            resolver,
            bridge,
            sink,
        })
    }

    /// Resuelve una URL y la agrega a la cola; si el reproductor estaba
    /// inactivo, arranca la reproducción de inmediato.
    ///
    /// La resolución corre fuera del lock: el orden de inserción en la cola
    /// es el orden en que terminan las resoluciones, no el orden de envío.
    pub async fn enqueue(self: &Arc<Self>, url: &str) -> Result<Song, ResolveError> {
        let song = self.resolver.resolve(url).await?;

        let mut core = self.core.lock().await;
        core.queue.push(song.clone());
        info!("➕ Agregado a la cola: {} - {}", song.title, song.artist);
        self.emit_queue_update(&core);

        if core.state == PlaybackState::Idle {
            self.advance_locked(&mut core).await;
        }

        Ok(song)
    }

    /// Pausa lógica: marca el estado y lo notifica.
    ///
    /// Limitación conocida: el proceso de transcodificación no se suspende a
    /// nivel de sistema; los frames siguen fluyendo hacia el sink.
    pub async fn pause(&self) -> bool {
        let mut core = self.core.lock().await;
        if core.state != PlaybackState::Playing {
            return false;
        }
        core.state = PlaybackState::Paused;
        info!("⏸️ Reproducción pausada");
        self.events.emit(PlayerEvent::Pause);
        self.emit_queue_update(&core);
        true
    }

    /// Quita la marca de pausa.
    pub async fn resume(&self) -> bool {
        let mut core = self.core.lock().await;
        if core.state != PlaybackState::Paused {
            return false;
        }
        core.state = PlaybackState::Playing;
        info!("▶️ Reproducción reanudada");
        self.events.emit(PlayerEvent::Resume);
        self.emit_queue_update(&core);
        true
    }

    /// Salta la canción actual. `false` si no hay nada que saltar.
    pub async fn skip(self: &Arc<Self>) -> bool {
        let mut core = self.core.lock().await;
        let Some((song, _)) = &core.current else {
            return false;
        };
        info!("⏭️ Saltando: {}", song.title);
        self.advance_locked(&mut core).await;
        true
    }

    /// Detiene la reproducción y vacía la cola. Siempre tiene éxito.
    pub async fn stop(&self) {
        let mut core = self.core.lock().await;
        if let Some((_, session)) = core.current.take() {
            session.close();
        }
        core.queue.clear();
        core.state = PlaybackState::Idle;
        info!("⏹️ Reproducción detenida y cola limpiada");
        self.events.emit(PlayerEvent::Stop);
        self.emit_queue_update(&core);
    }

    /// Vacía la cola sin tocar la canción actual.
    pub async fn clear_queue(&self) -> usize {
        let mut core = self.core.lock().await;
        let removed = core.queue.len();
        core.queue.clear();
        info!("🗑️ Cola limpiada ({} canciones)", removed);
        self.emit_queue_update(&core);
        removed
    }

    /// Ajusta el volumen global, con clamp a [0, 100].
    ///
    /// El filtro de ganancia se fija al abrir cada sesión, así que el nuevo
    /// valor aplica a partir de la siguiente canción.
    pub async fn set_volume(&self, level: i64) -> u8 {
        let clamped = level.clamp(0, 100) as u8;
        let mut core = self.core.lock().await;
        core.volume = clamped;
        info!("🔊 Volumen ajustado a {}%", clamped);
        self.events.emit(PlayerEvent::VolumeChange(clamped));
        self.emit_queue_update(&core);
        clamped
    }

    pub async fn status(&self) -> PlayerStatus {
        let core = self.core.lock().await;
        Self::snapshot(&core)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    // Señal de fin de una sesión. Las señales de sesiones ya reemplazadas
    // (saltadas o detenidas) se descartan por id para no avanzar dos veces.
    //
    // Devuelve un futuro encajado (`BoxFuture` `Send`) en lugar de un
    // `async fn` opaco: la recursión advance_locked → start_song →
    // spawn(handle_session_end) → advance_locked forma un ciclo que la
    // inferencia de `Send` no puede cerrar sobre un tipo opaco, y el tipo de
    // retorno concreto (con `Send` declarado) lo corta, habilitando
    // `tokio::spawn`.
    fn handle_session_end(
        self: Arc<Self>,
        session_id: u64,
        end: SessionEnd,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut core = self.core.lock().await;

            let is_current =
                matches!(&core.current, Some((_, session)) if session.id() == session_id);
            if !is_current {
                debug!("🔁 Señal de fin para sesión obsoleta {}", session_id);
                return;
            }

            match end.error {
                Some(err) => warn!("⚠️ La sesión terminó con error: {}", err),
                None => info!("🏁 Canción finalizada"),
            }

            self.advance_locked(&mut core).await;
        })
    }

    // Avance: cierra la sesión vigente y arranca la siguiente canción, o
    // vuelve a Idle con la cola vacía. Se ejecuta siempre bajo el lock de
    // core, de modo que un avance termina por completo antes de que otro
    // pueda comenzar.
    async fn advance_locked(self: &Arc<Self>, core: &mut PlayerCore) {
        if let Some((_, session)) = core.current.take() {
            session.close();
        }

        while let Some(song) = core.queue.pop_front() {
            match self.start_song(core, song.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("❌ No se pudo reproducir {}: {}", song.title, e);
                }
            }
        }

        core.state = PlaybackState::Idle;
        self.events.emit(PlayerEvent::PlaybackEnd);
        self.emit_queue_update(&core);
    }

    async fn start_song(
        self: &Arc<Self>,
        core: &mut PlayerCore,
        song: Song,
    ) -> Result<(), TransportError> {
        let input = self.resolver.open_audio_stream(&song).await?;
        let mut session = self.bridge.open(input, core.volume).await?;

        if let Some(end_rx) = session.take_end_signal() {
            let session_id = session.id();
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                if let Ok(end) = end_rx.await {
                    controller.handle_session_end(session_id, end).await;
                }
            });
        }

        if let Some(frames) = session.take_frames() {
            let sink = Arc::clone(&self.sink);
            let sink_song = song.clone();
            tokio::spawn(async move {
                sink.play(sink_song, frames).await;
            });
        }

        info!("🎵 Reproduciendo: {} - {}", song.title, song.artist);
        core.current = Some((song.clone(), session));
        core.state = PlaybackState::Playing;
        self.events.emit(PlayerEvent::SongStart(song));
        self.emit_queue_update(&core);
        Ok(())
    }

    fn emit_queue_update(&self, core: &PlayerCore) {
        self.events
            .emit(PlayerEvent::QueueUpdate(Self::snapshot(core)));
    }

    fn snapshot(core: &PlayerCore) -> PlayerStatus {
        PlayerStatus {
            state: core.state,
            current_song: core.current.as_ref().map(|(song, _)| song.clone()),
            queue: core.queue.snapshot(),
            queue_length: core.queue.len(),
            volume: core.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::AudioInput;
    use crate::sources::{MockSongResolver, SourceKind};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn test_song(url: &str) -> Song {
        Song {
            title: format!("título {}", url),
            artist: "Artista".to_string(),
            source: SourceKind::YouTube,
            url: url.to_string(),
            original_url: url.to_string(),
            duration: Some(180),
            thumbnail: None,
        }
    }

    // Resolutor falso con latencia configurable por URL.
    struct FakeResolver {
        delays_ms: HashMap<String, u64>,
    }

    impl FakeResolver {
        fn instant() -> Self {
            Self {
                delays_ms: HashMap::new(),
            }
        }

        fn with_delays(delays: &[(&str, u64)]) -> Self {
            Self {
                delays_ms: delays
                    .iter()
                    .map(|(url, ms)| (url.to_string(), *ms))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl SongResolver for FakeResolver {
        async fn resolve(&self, url: &str) -> Result<Song, ResolveError> {
            if let Some(ms) = self.delays_ms.get(url) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            Ok(test_song(url))
        }

        async fn open_audio_stream(&self, _song: &Song) -> Result<AudioInput, TransportError> {
            Ok(Box::new(tokio::io::empty()))
        }
    }

    struct FakeSessionHandle {
        cancel: CancellationToken,
        end_tx: Option<oneshot::Sender<SessionEnd>>,
    }

    // Puente falso: construye sesiones de canal puro y verifica en cada
    // apertura que ninguna sesión anterior siga viva.
    struct FakeBridge {
        sessions: StdMutex<Vec<FakeSessionHandle>>,
        fail_remaining: AtomicUsize,
        next_id: AtomicU64,
    }

    impl FakeBridge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sessions: StdMutex::new(Vec::new()),
                fail_remaining: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            })
        }

        fn fail_next_opens(&self, count: usize) {
            self.fail_remaining.store(count, Ordering::SeqCst);
        }

        fn finish(&self, index: usize, error: Option<&str>) {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(tx) = sessions[index].end_tx.take() {
                let _ = tx.send(SessionEnd {
                    error: error.map(str::to_string),
                });
            }
        }

        fn open_count(&self) -> usize {
            self.sessions.lock().unwrap().len()
        }

        fn is_cancelled(&self, index: usize) -> bool {
            self.sessions.lock().unwrap()[index].cancel.is_cancelled()
        }
    }

    #[async_trait]
    impl TransportBridge for FakeBridge {
        async fn open(
            &self,
            _input: AudioInput,
            _volume: u8,
        ) -> Result<TransportSession, TransportError> {
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::ProcessFailed("fallo simulado".to_string()));
            }

            let mut sessions = self.sessions.lock().unwrap();
            // cerrar-antes-de-abrir: nunca dos sesiones coexistiendo
            assert!(
                sessions.iter().all(|s| s.cancel.is_cancelled()),
                "se abrió una sesión con otra aún viva"
            );

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let (end_tx, end_rx) = oneshot::channel();
            let (_frame_tx, frame_rx) = mpsc::channel(1);

            sessions.push(FakeSessionHandle {
                cancel: cancel.clone(),
                end_tx: Some(end_tx),
            });

            Ok(TransportSession::from_parts(id, cancel, frame_rx, end_rx))
        }
    }

    struct FakeSink {
        played: StdMutex<Vec<String>>,
    }

    impl FakeSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                played: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FrameSink for FakeSink {
        async fn play(&self, song: Song, mut frames: mpsc::Receiver<Bytes>) {
            self.played.lock().unwrap().push(song.title);
            while frames.recv().await.is_some() {}
        }
    }

    struct Harness {
        player: Arc<PlaybackController>,
        bridge: Arc<FakeBridge>,
        sink: Arc<FakeSink>,
        events: tokio::sync::broadcast::Receiver<PlayerEvent>,
    }

    fn harness_with_resolver(resolver: Arc<dyn SongResolver>) -> Harness {
        let bridge = FakeBridge::new();
        let sink = FakeSink::new();
        let bus = EventBus::default();
        let events = bus.subscribe();
        let player = PlaybackController::new(
            resolver,
            bridge.clone() as Arc<dyn TransportBridge>,
            sink.clone() as Arc<dyn FrameSink>,
            bus,
            50,
        );
        Harness {
            player,
            bridge,
            sink,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with_resolver(Arc::new(FakeResolver::instant()))
    }

    fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait_for(
        player: &Arc<PlaybackController>,
        pred: impl Fn(&PlayerStatus) -> bool,
    ) -> PlayerStatus {
        for _ in 0..200 {
            let status = player.status().await;
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("el estado esperado nunca llegó: {:?}", player.status().await);
    }

    #[tokio::test]
    async fn test_volume_is_clamped_on_every_write() {
        let h = harness();
        assert_eq!(h.player.set_volume(150).await, 100);
        assert_eq!(h.player.status().await.volume, 100);
        assert_eq!(h.player.set_volume(-5).await, 0);
        assert_eq!(h.player.status().await.volume, 0);
        assert_eq!(h.player.set_volume(73).await, 73);
    }

    #[tokio::test]
    async fn test_enqueue_autoplays_when_idle() {
        let h = harness();
        let song = h.player.enqueue("https://youtu.be/a").await.unwrap();

        let status = h.player.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.current_song.unwrap().title, song.title);
        // la canción actual nunca está también en la cola
        assert_eq!(status.queue_length, 0);
        assert_eq!(h.bridge.open_count(), 1);

        wait_for(&h.player, |_| !h.sink.played.lock().unwrap().is_empty()).await;
        assert_eq!(h.sink.played.lock().unwrap()[0], song.title);
    }

    #[tokio::test]
    async fn test_enqueue_while_playing_only_appends() {
        let h = harness();
        h.player.enqueue("https://youtu.be/a").await.unwrap();
        h.player.enqueue("https://youtu.be/b").await.unwrap();

        let status = h.player.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.queue_length, 1);
        assert_eq!(h.bridge.open_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_leaves_queue_unchanged() {
        let mut resolver = MockSongResolver::new();
        resolver
            .expect_resolve()
            .returning(|url| Err(ResolveError::UnsupportedUrl(url.to_string())));
        let h = harness_with_resolver(Arc::new(resolver));

        let result = h.player.enqueue("https://example.com/x").await;
        assert!(matches!(result, Err(ResolveError::UnsupportedUrl(_))));

        let status = h.player.status().await;
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.queue_length, 0);
        assert_eq!(h.bridge.open_count(), 0);
    }

    #[tokio::test]
    async fn test_skip_on_idle_returns_false() {
        let h = harness();
        assert!(!h.player.skip().await);
        assert_eq!(h.player.status().await.state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_pause_resume_roundtrip() {
        let mut h = harness();
        let song = h.player.enqueue("https://youtu.be/a").await.unwrap();
        drain_events(&mut h.events);

        assert!(h.player.pause().await);
        assert!(!h.player.pause().await); // pausar dos veces es un no-op
        assert!(h.player.resume().await);
        assert!(!h.player.resume().await);

        let status = h.player.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.current_song.unwrap().title, song.title);

        let events = drain_events(&mut h.events);
        let pauses = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::Pause))
            .count();
        let resumes = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::Resume))
            .count();
        assert_eq!((pauses, resumes), (1, 1));
    }

    #[tokio::test]
    async fn test_pause_is_invalid_from_idle() {
        let h = harness();
        assert!(!h.player.pause().await);
        assert!(!h.player.resume().await);
    }

    #[tokio::test]
    async fn test_stop_clears_everything() {
        let h = harness();
        h.player.enqueue("https://youtu.be/a").await.unwrap();
        h.player.enqueue("https://youtu.be/b").await.unwrap();

        h.player.stop().await;

        let status = h.player.status().await;
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.queue_length, 0);
        assert!(status.current_song.is_none());
        assert!(h.bridge.is_cancelled(0));
    }

    #[tokio::test]
    async fn test_natural_end_advances_to_next_song() {
        let mut h = harness();
        h.player.enqueue("https://youtu.be/a").await.unwrap();
        h.player.enqueue("https://youtu.be/b").await.unwrap();
        drain_events(&mut h.events);

        h.bridge.finish(0, None);
        let status =
            wait_for(&h.player, |s| {
                s.current_song.as_deref_title() == Some("título https://youtu.be/b")
            })
            .await;

        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.queue_length, 0);
        // la sesión vieja se cerró antes de abrir la nueva (el puente falso
        // lo asevera en cada open); ambas aperturas ocurrieron
        assert_eq!(h.bridge.open_count(), 2);
        assert!(h.bridge.is_cancelled(0));

        let events = drain_events(&mut h.events);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::PlaybackEnd)));

        h.bridge.finish(1, None);
        wait_for(&h.player, |s| s.state == PlaybackState::Idle).await;
        let events = drain_events(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, PlayerEvent::PlaybackEnd)));
    }

    #[tokio::test]
    async fn test_transport_error_triggers_auto_advance() {
        let mut h = harness();
        h.player.enqueue("https://youtu.be/a").await.unwrap();
        h.player.enqueue("https://youtu.be/b").await.unwrap();
        drain_events(&mut h.events);

        // el proceso sale con código de error y queda una canción en cola
        h.bridge.finish(0, Some("el proceso salió con exit status: 1"));
        let status = wait_for(&h.player, |s| {
            s.current_song.as_deref_title() == Some("título https://youtu.be/b")
        })
        .await;

        assert_eq!(status.state, PlaybackState::Playing);
        // playbackEnd solo se emite con la cola vacía al fallar
        let events = drain_events(&mut h.events);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::PlaybackEnd)));
    }

    #[tokio::test]
    async fn test_stale_end_signal_does_not_double_advance() {
        let h = harness();
        h.player.enqueue("https://youtu.be/a").await.unwrap();
        h.player.enqueue("https://youtu.be/b").await.unwrap();

        // skip reemplaza la sesión 0 por la 1
        assert!(h.player.skip().await);
        let before = h.player.status().await;
        assert_eq!(
            before.current_song.as_deref_title(),
            Some("título https://youtu.be/b")
        );

        // la señal tardía de la sesión saltada no debe avanzar de nuevo
        h.bridge.finish(0, Some("terminado por señal"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let after = h.player.status().await;
        assert_eq!(after.state, PlaybackState::Playing);
        assert_eq!(
            after.current_song.as_deref_title(),
            Some("título https://youtu.be/b")
        );
        assert_eq!(h.bridge.open_count(), 2);
    }

    #[tokio::test]
    async fn test_queue_order_is_resolution_completion_order() {
        let resolver = FakeResolver::with_delays(&[
            ("https://youtu.be/lenta", 80),
            ("https://youtu.be/rapida", 10),
        ]);
        let h = harness_with_resolver(Arc::new(resolver));

        // A se envía antes que B, pero B resuelve primero
        let (a, b) = tokio::join!(
            h.player.enqueue("https://youtu.be/lenta"),
            h.player.enqueue("https://youtu.be/rapida"),
        );
        a.unwrap();
        b.unwrap();

        let status = h.player.status().await;
        // B llegó a una cola vacía e inactiva: reproduce de inmediato
        assert_eq!(
            status.current_song.as_deref_title(),
            Some("título https://youtu.be/rapida")
        );
        // A quedó en cola detrás
        let titles: Vec<_> = status.queue.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["título https://youtu.be/lenta"]);
    }

    #[tokio::test]
    async fn test_open_failure_is_absorbed_and_next_song_plays() {
        let h = harness();
        h.bridge.fail_next_opens(1);

        // la resolución tuvo éxito aunque el transporte falló
        h.player.enqueue("https://youtu.be/a").await.unwrap();
        assert_eq!(h.player.status().await.state, PlaybackState::Idle);

        h.player.enqueue("https://youtu.be/b").await.unwrap();
        let status = h.player.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(
            status.current_song.as_deref_title(),
            Some("título https://youtu.be/b")
        );
    }

    // Pequeño helper para comparar títulos de Option<Song>.
    trait TitleExt {
        fn as_deref_title(&self) -> Option<&str>;
    }

    impl TitleExt for Option<Song> {
        fn as_deref_title(&self) -> Option<&str> {
            self.as_ref().map(|s| s.title.as_str())
        }
    }
}
