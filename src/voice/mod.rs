//! Cliente del canal de voz (TeamSpeak ServerQuery).
//!
//! ServerQuery es el plano de control del servidor: membresía de canales,
//! movimiento de clientes, listados. No transporta audio; el sink de frames
//! de este módulo es el punto de integración con un transporte real.

pub mod server_query;

use serde::Serialize;

pub use server_query::ServerQueryClient;

/// Canal de voz visible en el servidor.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceChannel {
    pub id: u64,
    pub name: String,
    pub parent_id: u64,
}

/// Estado del cliente de voz para reportes.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStatus {
    pub connected: bool,
    pub current_channel: Option<u64>,
    pub nickname: String,
}
