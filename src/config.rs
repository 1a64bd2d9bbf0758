use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    // TeamSpeak
    pub ts3_host: String,
    pub ts3_query_port: u16,
    pub ts3_username: String,
    pub ts3_password: String,
    pub ts3_nickname: String,
    pub ts3_default_channel: Option<String>,

    // API
    pub api_port: u16,

    // Audio
    pub default_volume: u8,
    pub transcoder_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // TeamSpeak
            ts3_host: std::env::var("TS3_HOST").unwrap_or_else(|_| "localhost".to_string()),
            ts3_query_port: std::env::var("TS3_QUERY_PORT")
                .unwrap_or_else(|_| "10011".to_string())
                .parse()?,
            ts3_username: std::env::var("TS3_USERNAME")
                .unwrap_or_else(|_| "serveradmin".to_string()),
            ts3_password: std::env::var("TS3_PASSWORD")?,
            ts3_nickname: std::env::var("TS3_NICKNAME").unwrap_or_else(|_| "MusicBot".to_string()),
            ts3_default_channel: std::env::var("TS3_DEFAULT_CHANNEL").ok(),

            // API
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            transcoder_path: std::env::var("TRANSCODER_PATH")
                .unwrap_or_else(|_| "ffmpeg".to_string())
                .into(),
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Valida los valores de configuración antes de arrancar.
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!(
                "El volumen por defecto debe estar entre 0 y 100, recibido: {}",
                self.default_volume
            );
        }

        if self.ts3_host.trim().is_empty() {
            anyhow::bail!("TS3_HOST no puede estar vacío");
        }

        if self.ts3_username.trim().is_empty() {
            anyhow::bail!("TS3_USERNAME no puede estar vacío");
        }

        Ok(())
    }

    /// Resumen de la configuración para el log de arranque (sin credenciales).
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            TeamSpeak: {}:{} como \"{}\" (canal: {})\n  \
            API: puerto {}\n  \
            Audio: {}% vol, transcodificador {}",
            self.ts3_host,
            self.ts3_query_port,
            self.ts3_nickname,
            self.ts3_default_channel.as_deref().unwrap_or("ninguno"),
            self.api_port,
            self.default_volume,
            self.transcoder_path.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            ts3_host: "localhost".to_string(),
            ts3_query_port: 10011,
            ts3_username: "serveradmin".to_string(),
            ts3_password: "secret".to_string(),
            ts3_nickname: "MusicBot".to_string(),
            ts3_default_channel: None,
            api_port: 3000,
            default_volume: 50,
            transcoder_path: "ffmpeg".into(),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_volume_over_100() {
        let mut config = base_config();
        config.default_volume = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let mut config = base_config();
        config.ts3_host = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
