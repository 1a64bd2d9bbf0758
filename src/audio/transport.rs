//! Puente de transporte: una sesión de transcodificación por canción.
//!
//! Cada sesión posee exactamente un proceso externo (ffmpeg por defecto)
//! que recibe audio comprimido por stdin y emite PCM s16le intercalado a
//! 48 kHz estéreo por stdout, con un filtro de ganancia lineal aplicado.
//! La salida se trocea en frames de 20 ms listos para el transporte de voz.
//!
//! Invariante central: como máximo una sesión existe a la vez; el llamador
//! (el controlador) cierra la sesión vigente antes de abrir la siguiente.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;

/// Stream de audio comprimido que alimenta al transcodificador.
pub type AudioInput = Box<dyn AsyncRead + Send + Unpin>;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 2;
/// Frame de 20 ms: 960 muestras × 2 canales × 2 bytes.
pub const FRAME_BYTES: usize = 3840;

/// Notificación única de fin de sesión, sea cual sea la causa de salida.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    pub error: Option<String>,
}

/// Sesión de transcodificación activa.
///
/// Posee el proceso externo y sus pipes durante la vida de una canción.
/// `close` es idempotente y seguro sobre una sesión ya terminada.
pub struct TransportSession {
    id: u64,
    cancel: CancellationToken,
    frames: Option<mpsc::Receiver<Bytes>>,
    ended: Option<oneshot::Receiver<SessionEnd>>,
}

impl TransportSession {
    pub(crate) fn from_parts(
        id: u64,
        cancel: CancellationToken,
        frames: mpsc::Receiver<Bytes>,
        ended: oneshot::Receiver<SessionEnd>,
    ) -> Self {
        Self {
            id,
            cancel,
            frames: Some(frames),
            ended: Some(ended),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Entrega el stream de frames PCM; solo puede tomarse una vez.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.frames.take()
    }

    /// Entrega el receptor de la notificación de fin; solo una vez.
    pub fn take_end_signal(&mut self) -> Option<oneshot::Receiver<SessionEnd>> {
        self.ended.take()
    }

    /// Termina el proceso y libera los pipes. No-op si ya terminó.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Seam del puente de transporte que consume el controlador.
#[async_trait]
pub trait TransportBridge: Send + Sync {
    /// Abre una sesión nueva. El llamador garantiza cerrar-antes-de-abrir.
    async fn open(&self, input: AudioInput, volume: u8) -> Result<TransportSession, TransportError>;
}

/// Puente de producción sobre un proceso ffmpeg.
pub struct FfmpegBridge {
    program: PathBuf,
    next_id: AtomicU64,
}

impl FfmpegBridge {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            next_id: AtomicU64::new(1),
        }
    }

    /// Contrato fijo del transcodificador: stdin comprimido → stdout PCM.
    fn transcode_args(volume: u8) -> Vec<String> {
        vec![
            "-i".to_string(),
            "pipe:0".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            CHANNELS.to_string(),
            "-af".to_string(),
            format!("volume={}", volume as f32 / 100.0),
            "pipe:1".to_string(),
        ]
    }
}

#[async_trait]
impl TransportBridge for FfmpegBridge {
    async fn open(&self, mut input: AudioInput, volume: u8) -> Result<TransportSession, TransportError> {
        let mut child = Command::new(&self.program)
            .args(Self::transcode_args(volume))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("🎛️ Sesión de transcodificación {} iniciada", id);

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::ProcessFailed("stdin no disponible".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::ProcessFailed("stdout no disponible".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::ProcessFailed("stderr no disponible".to_string()))?;

        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (end_tx, end_rx) = oneshot::channel();

        // Alimentador: copia el stream comprimido al stdin del proceso.
        // Al soltar stdin se cierra el pipe y el proceso puede terminar solo.
        let feeder_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = feeder_cancel.cancelled() => {}
                result = tokio::io::copy(&mut input, &mut stdin) => {
                    if let Err(e) = result {
                        debug!("⚠️ Escritura al transcodificador interrumpida: {}", e);
                    }
                }
            }
        });

        // El diagnóstico del proceso va al log, nunca al llamador.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("FFmpeg: {}", line);
            }
        });

        // Lector: trocea stdout en frames de tamaño fijo.
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut chunker = FrameChunker::new(FRAME_BYTES);
            let mut buf = vec![0u8; 8192];
            loop {
                let read = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    r = stdout.read(&mut buf) => r,
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        for frame in chunker.push(&buf[..n]) {
                            if frame_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("⚠️ Lectura del transcodificador interrumpida: {}", e);
                        break;
                    }
                }
            }
            if let Some(rest) = chunker.flush() {
                let _ = frame_tx.send(rest).await;
            }
        });

        // Vigilante: exactamente una notificación de fin por sesión.
        let waiter_cancel = cancel.clone();
        tokio::spawn(async move {
            let natural_exit = tokio::select! {
                s = child.wait() => Some(s),
                _ = waiter_cancel.cancelled() => None,
            };

            let status = match natural_exit {
                Some(status) => status,
                None => {
                    if let Err(e) = child.kill().await {
                        debug!("⚠️ No se pudo terminar el proceso: {}", e);
                    }
                    child.wait().await
                }
            };

            let end = match status {
                Ok(s) if s.success() => SessionEnd { error: None },
                Ok(s) => SessionEnd {
                    error: Some(format!("el proceso salió con {}", s)),
                },
                Err(e) => SessionEnd {
                    error: Some(e.to_string()),
                },
            };
            debug!("🏁 Sesión {} terminada", id);
            let _ = end_tx.send(end);
        });

        Ok(TransportSession::from_parts(id, cancel, frame_rx, end_rx))
    }
}

/// Acumula bytes y los corta en frames de tamaño fijo.
struct FrameChunker {
    frame_len: usize,
    pending: BytesMut,
}

impl FrameChunker {
    fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            pending: BytesMut::new(),
        }
    }

    fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(data);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            frames.push(self.pending.split_to(self.frame_len).freeze());
        }
        frames
    }

    /// Resto final más corto que un frame, si lo hay.
    fn flush(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transcode_args_contract() {
        let args = FfmpegBridge::transcode_args(50);
        assert_eq!(
            args,
            vec![
                "-i", "pipe:0", "-f", "s16le", "-ar", "48000", "-ac", "2", "-af", "volume=0.5",
                "pipe:1"
            ]
        );
    }

    #[test]
    fn test_transcode_args_volume_extremes() {
        assert!(FfmpegBridge::transcode_args(100).contains(&"volume=1".to_string()));
        assert!(FfmpegBridge::transcode_args(0).contains(&"volume=0".to_string()));
    }

    #[test]
    fn test_frame_chunker_exact_frames() {
        let mut chunker = FrameChunker::new(4);
        let frames = chunker.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[1, 2, 3, 4]);
        assert_eq!(&frames[1][..], &[5, 6, 7, 8]);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn test_frame_chunker_carries_remainder() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[1, 2, 3]).is_empty());
        let frames = chunker.push(&[4, 5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[1, 2, 3, 4]);
        let rest = chunker.flush().unwrap();
        assert_eq!(&rest[..], &[5]);
    }

    // Usa un binario trivial en lugar de ffmpeg: el contrato de la sesión
    // (una única notificación de fin, cierre idempotente) no depende del
    // transcodificador real.
    #[tokio::test]
    async fn test_session_emits_single_end_notification() {
        let bridge = FfmpegBridge::new("true".into());
        let input: AudioInput = Box::new(tokio::io::empty());

        let mut session = bridge.open(input, 50).await.unwrap();
        let end_rx = session.take_end_signal().unwrap();

        let end = end_rx.await.unwrap();
        assert!(end.error.is_none());

        // cerrar una sesión ya terminada es un no-op
        session.close();
        session.close();
    }

    #[tokio::test]
    async fn test_session_reports_abnormal_exit() {
        let bridge = FfmpegBridge::new("false".into());
        let input: AudioInput = Box::new(tokio::io::empty());

        let mut session = bridge.open(input, 50).await.unwrap();
        let end_rx = session.take_end_signal().unwrap();

        let end = end_rx.await.unwrap();
        assert!(end.error.is_some());
    }
}
