use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::audio::player::FrameSink;
use crate::config::Config;
use crate::error::VoiceError;
use crate::sources::Song;
use crate::voice::{VoiceChannel, VoiceStatus};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: u64,
}

/// Cliente ServerQuery de TeamSpeak 3 sobre TCP.
pub struct ServerQueryClient {
    host: String,
    port: u16,
    username: String,
    password: String,
    nickname: String,
    default_channel: Option<String>,
    conn: Mutex<Option<Connection>>,
    connected: AtomicBool,
    current_channel: parking_lot::RwLock<Option<u64>>,
    drained_pcm_bytes: AtomicU64,
}

impl ServerQueryClient {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.ts3_host.clone(),
            port: config.ts3_query_port,
            username: config.ts3_username.clone(),
            password: config.ts3_password.clone(),
            nickname: config.ts3_nickname.clone(),
            default_channel: config.ts3_default_channel.clone(),
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            current_channel: parking_lot::RwLock::new(None),
            drained_pcm_bytes: AtomicU64::new(0),
        }
    }

    /// Conecta, se autentica, selecciona el primer servidor virtual y, si
    /// está configurado, entra al canal por defecto.
    pub async fn connect(&self) -> Result<(), VoiceError> {
        info!("🔌 Conectando a TeamSpeak {}:{}...", self.host, self.port);

        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Banner del protocolo: "TS3" seguido de una línea de bienvenida
        let mut banner = String::new();
        reader.read_line(&mut banner).await?;
        if !banner.trim_start().starts_with("TS3") {
            return Err(VoiceError::ConnectionLost(
                "el servidor no habla ServerQuery".to_string(),
            ));
        }
        let mut welcome = String::new();
        reader.read_line(&mut welcome).await?;

        let mut conn = Connection {
            reader,
            writer: write_half,
            client_id: 0,
        };

        let login = format!(
            "login {} {}",
            escape(&self.username),
            escape(&self.password)
        );
        Self::command(&mut conn, &login).await?;

        // Seleccionar el primer servidor virtual disponible
        let servers = Self::command(&mut conn, "serverlist").await?;
        let sid = servers
            .first()
            .and_then(|line| first_record_value(line, "virtualserver_id"))
            .ok_or_else(|| {
                VoiceError::ConnectionLost("sin servidores virtuales disponibles".to_string())
            })?;
        Self::command(&mut conn, &format!("use sid={}", sid)).await?;

        let whoami = Self::command(&mut conn, "whoami").await?;
        conn.client_id = whoami
            .first()
            .and_then(|line| first_record_value(line, "client_id"))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                VoiceError::ConnectionLost("whoami sin client_id".to_string())
            })?;

        let rename = format!("clientupdate client_nickname={}", escape(&self.nickname));
        if let Err(e) = Self::command(&mut conn, &rename).await {
            warn!("⚠️ No se pudo fijar el nickname: {}", e);
        }

        *self.conn.lock().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        info!("✅ Conectado a TeamSpeak como \"{}\"", self.nickname);

        if let Some(channel) = self.default_channel.clone() {
            self.join_channel_by_name(&channel).await?;
        }

        Ok(())
    }

    /// Cierra la sesión ServerQuery.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(mut connection) = conn.take() {
            let _ = connection.writer.write_all(b"quit\n").await;
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.current_channel.write() = None;
        info!("👋 Desconectado de TeamSpeak");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Lista todos los canales del servidor.
    pub async fn channels(&self) -> Result<Vec<VoiceChannel>, VoiceError> {
        let data = self.run("channellist").await?;
        let line = data.first().map(String::as_str).unwrap_or_default();
        Ok(parse_channel_list(line))
    }

    /// Mueve el bot al canal indicado.
    pub async fn join_channel(&self, channel_id: u64) -> Result<(), VoiceError> {
        let client_id = {
            let conn = self.conn.lock().await;
            conn.as_ref().ok_or(VoiceError::NotConnected)?.client_id
        };

        self.run(&format!("clientmove clid={} cid={}", client_id, channel_id))
            .await?;
        *self.current_channel.write() = Some(channel_id);
        info!("🔊 Canal {} ocupado", channel_id);
        Ok(())
    }

    /// Busca un canal por nombre (sin distinguir mayúsculas) y entra.
    pub async fn join_channel_by_name(&self, name: &str) -> Result<(), VoiceError> {
        let channels = self.channels().await?;
        let channel = channels
            .into_iter()
            .find(|ch| ch.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| VoiceError::ChannelNotFound(name.to_string()))?;

        self.join_channel(channel.id).await
    }

    pub fn status(&self) -> VoiceStatus {
        VoiceStatus {
            connected: self.is_connected(),
            current_channel: *self.current_channel.read(),
            nickname: self.nickname.clone(),
        }
    }

    // Ejecuta un comando sobre la conexión vigente.
    async fn run(&self, command: &str) -> Result<Vec<String>, VoiceError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(VoiceError::NotConnected)?;

        let result = Self::command(conn, command).await;
        if matches!(
            result,
            Err(VoiceError::ConnectionLost(_)) | Err(VoiceError::Io(_))
        ) {
            // la conexión quedó inutilizable
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    // Envía una línea y lee hasta la línea "error id=... msg=...".
    async fn command(conn: &mut Connection, command: &str) -> Result<Vec<String>, VoiceError> {
        debug!("📨 ServerQuery: {}", command.split_whitespace().next().unwrap_or(""));

        conn.writer.write_all(command.as_bytes()).await?;
        conn.writer.write_all(b"\n").await?;

        let mut data = Vec::new();
        loop {
            let mut line = String::new();
            let read = conn.reader.read_line(&mut line).await?;
            if read == 0 {
                return Err(VoiceError::ConnectionLost(
                    "el servidor cerró la conexión".to_string(),
                ));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(result) = parse_error_line(line) {
                let (id, msg) = result;
                if id == 0 {
                    return Ok(data);
                }
                return Err(VoiceError::Command { id, msg });
            }

            data.push(line.to_string());
        }
    }
}

#[async_trait]
impl FrameSink for ServerQueryClient {
    async fn play(&self, song: Song, mut frames: mpsc::Receiver<Bytes>) {
        if !self.is_connected() {
            warn!("🔇 Sin conexión de voz; el audio de \"{}\" no se entrega", song.title);
        }

        // ServerQuery no transporta audio: este drenaje contabilizado es el
        // punto de integración con el SDK de cliente de TeamSpeak.
        let mut bytes: u64 = 0;
        while let Some(frame) = frames.recv().await {
            bytes += frame.len() as u64;
        }
        self.drained_pcm_bytes.fetch_add(bytes, Ordering::Relaxed);
        debug!("📡 {} bytes PCM drenados para \"{}\"", bytes, song.title);
    }
}

/// Escapa un valor según las reglas de ServerQuery.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str(r"\\"),
            '/' => out.push_str(r"\/"),
            ' ' => out.push_str(r"\s"),
            '|' => out.push_str(r"\p"),
            '\x07' => out.push_str(r"\a"),
            '\x08' => out.push_str(r"\b"),
            '\x0c' => out.push_str(r"\f"),
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            '\t' => out.push_str(r"\t"),
            '\x0b' => out.push_str(r"\v"),
            other => out.push(other),
        }
    }
    out
}

/// Deshace el escapado de ServerQuery.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\x0b'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// Parsea un registro "k1=v1 k2=v2" en un mapa con valores des-escapados.
fn parse_record(record: &str) -> HashMap<String, String> {
    record
        .split(' ')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), unescape(value)))
        })
        .collect()
}

// Valor de una clave dentro del primer registro de una línea de respuesta.
fn first_record_value(line: &str, key: &str) -> Option<String> {
    let record = line.split('|').next()?;
    parse_record(record).remove(key)
}

// Línea de resultado: "error id=0 msg=ok".
fn parse_error_line(line: &str) -> Option<(u32, String)> {
    let rest = line.strip_prefix("error ")?;
    let fields = parse_record(rest);
    let id = fields.get("id")?.parse().ok()?;
    let msg = fields.get("msg").cloned().unwrap_or_default();
    Some((id, msg))
}

// "channellist": registros separados por '|'.
fn parse_channel_list(line: &str) -> Vec<VoiceChannel> {
    line.split('|')
        .filter_map(|record| {
            let fields = parse_record(record);
            Some(VoiceChannel {
                id: fields.get("cid")?.parse().ok()?,
                name: fields.get("channel_name").cloned()?,
                parent_id: fields.get("pid").and_then(|v| v.parse().ok()).unwrap_or(0),
            })
        })
        .collect()
}
