use thiserror::Error;

/// Errores de resolución de URLs a canciones.
///
/// Se devuelven al llamador de `enqueue`; la cola nunca se modifica cuando
/// la resolución falla.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("URL no soportada: {0}")]
    UnsupportedUrl(String),

    #[error("error al obtener metadata: {0}")]
    MetadataFetchFailed(String),

    #[error("sin resultados de búsqueda para \"{0}\"")]
    NoSearchResult(String),
}

/// Errores del proceso de transcodificación.
///
/// Nunca son fatales para el controlador: se absorben y disparan un
/// auto-avance a la siguiente canción.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no se pudo lanzar el transcodificador: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("no se pudo abrir el stream de audio: {0}")]
    StreamFailed(String),

    #[error("el proceso terminó con error: {0}")]
    ProcessFailed(String),
}

/// Errores del cliente de voz (ServerQuery).
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("no conectado al servidor TeamSpeak")]
    NotConnected,

    #[error("conexión con el servidor perdida: {0}")]
    ConnectionLost(String),

    #[error("canal \"{0}\" no encontrado")]
    ChannelNotFound(String),

    #[error("el servidor rechazó el comando (id={id}): {msg}")]
    Command { id: u32, msg: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
