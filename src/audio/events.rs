use tokio::sync::broadcast;

use crate::audio::player::PlayerStatus;
use crate::sources::Song;

/// Eventos publicados por el motor de reproducción.
///
/// Para una misma transición el orden es fijo: primero el evento de estado,
/// después el `QueueUpdate` con el snapshot resultante.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    SongStart(Song),
    PlaybackEnd,
    QueueUpdate(PlayerStatus),
    Pause,
    Resume,
    Stop,
    VolumeChange(u8),
}

/// Bus de eventos in-process sobre un canal broadcast.
///
/// La emisión nunca bloquea; los suscriptores lentos pueden perder eventos
/// (semántica de `tokio::sync::broadcast`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Publica un evento. Sin suscriptores no es un error.
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
