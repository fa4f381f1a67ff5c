//! Configuration file.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/bum/config.toml` by default. Command-line flags and their
//! environment variables override the file.

use std::path::{Path, PathBuf};

use bum_core::TracingOutputFormat;
use bum_server::{CoordinatorConfig, TranscodeFormat};
use serde::{Deserialize, Serialize};

use crate::cli::ServeArgs;
use crate::error::{CliError, CliResult};

/// Address the front listens on when nothing else is configured.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8000";

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BumConfig {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Library, transcoder and listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Root of the music library.
    pub media_root: Option<PathBuf>,

    /// Directory of the web client.
    pub static_root: Option<PathBuf>,

    /// Transcoder executable.
    pub transcoder: Option<PathBuf>,

    /// Transcode output format, `webm` or `ogg`.
    pub format: String,

    /// Address the HTTP front listens on.
    pub listen: String,

    /// Bytes per stream chunk.
    pub chunk_size: Option<usize>,

    pub warm_thumbnails: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            media_root: None,
            static_root: None,
            transcoder: None,
            format: TranscodeFormat::default().as_arg().to_string(),
            listen: DEFAULT_LISTEN.to_string(),
            chunk_size: None,
            warm_thumbnails: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for the bum crates when `RUST_LOG` is not set.
    pub level: String,

    pub format: TracingOutputFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: TracingOutputFormat::Compact,
        }
    }
}

/// Everything `bum serve` needs, after merging file and flags.
#[derive(Debug, Clone)]
pub struct ServeSettings {
    pub coordinator: CoordinatorConfig,
    pub listen: String,
}

impl BumConfig {
    /// Loads configuration from the default path, or defaults if there is
    /// no file there.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() { Self::load_from(&path) } else { Ok(Self::default()) }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| CliError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("bum")
    }

    /// Parses the configured transcode format.
    pub fn transcode_format(&self) -> CliResult<TranscodeFormat> {
        self.server.format.parse().map_err(CliError::Config)
    }

    /// Parses the configured log level.
    pub fn log_level(&self) -> CliResult<tracing::Level> {
        self.logging
            .level
            .parse()
            .map_err(|_| CliError::Config(format!("invalid log level '{}'", self.logging.level)))
    }

    /// Checks every value that is parsed lazily.
    pub fn validate(&self) -> CliResult<()> {
        self.transcode_format()?;
        self.log_level()?;
        if self.server.chunk_size == Some(0) {
            return Err(CliError::Config("chunk_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Merges `args` over the file settings.
    pub fn serve_settings(&self, args: &ServeArgs) -> CliResult<ServeSettings> {
        let media_root = args
            .media_root
            .as_ref()
            .or(self.server.media_root.as_ref())
            .ok_or_else(|| {
                CliError::Config(format!(
                    "no media library configured; pass it to `bum serve` or set media_root in {}",
                    Self::default_path().display()
                ))
            })?;

        let format = match args.format {
            Some(ref format) => format.parse().map_err(CliError::Config)?,
            None => self.transcode_format()?,
        };

        let mut coordinator = CoordinatorConfig::new(media_root)
            .with_transcode_format(format)
            .with_warm_thumbnails(self.server.warm_thumbnails && !args.no_warm_thumbnails);
        if let Some(root) = args.static_root.as_ref().or(self.server.static_root.as_ref()) {
            coordinator = coordinator.with_static_root(root);
        }
        if let Some(transcoder) = args.transcoder.as_ref().or(self.server.transcoder.as_ref()) {
            coordinator = coordinator.with_transcoder(transcoder);
        }
        if let Some(size) = self.server.chunk_size {
            coordinator = coordinator.with_chunk_size(size);
        }

        Ok(ServeSettings {
            coordinator,
            listen: args.listen.clone().unwrap_or_else(|| self.server.listen.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        let config: BumConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, DEFAULT_LISTEN);
        assert_eq!(config.server.format, "webm");
        assert!(config.server.warm_thumbnails);
        assert_eq!(config.logging.format, TracingOutputFormat::Compact);
    }

    #[test]
    fn file_values_are_read() {
        let config: BumConfig = toml::from_str(
            r#"
[server]
media_root = "/srv/music"
transcoder = "/usr/local/bin/bum-transcode"
format = "ogg"
chunk_size = 4096

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();
        config.validate().unwrap();

        let settings = config.serve_settings(&ServeArgs::default()).unwrap();
        assert_eq!(settings.coordinator.media_root, PathBuf::from("/srv/music"));
        assert_eq!(settings.coordinator.transcode_format, TranscodeFormat::Ogg);
        assert_eq!(settings.coordinator.chunk_size, 4096);
        assert_eq!(settings.listen, DEFAULT_LISTEN);
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(config.logging.format, TracingOutputFormat::Json);
    }

    #[test]
    fn flags_override_file() {
        let config: BumConfig = toml::from_str("[server]\nmedia_root = \"/a\"\nlisten = \"127.0.0.1:1\"\n").unwrap();
        let args = ServeArgs {
            media_root: Some(PathBuf::from("/b")),
            listen: Some("0.0.0.0:2".into()),
            static_root: Some(PathBuf::from("/www")),
            no_warm_thumbnails: true,
            ..Default::default()
        };

        let settings = config.serve_settings(&args).unwrap();
        assert_eq!(settings.coordinator.media_root, PathBuf::from("/b"));
        assert_eq!(settings.coordinator.static_root, PathBuf::from("/www"));
        assert!(!settings.coordinator.warm_thumbnails);
        assert_eq!(settings.listen, "0.0.0.0:2");
    }

    #[test]
    fn missing_media_root_is_an_error() {
        let err = BumConfig::default().serve_settings(&ServeArgs::default()).unwrap_err();
        assert!(err.to_string().contains("media_root"));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = BumConfig::default();
        config.server.format = "mp3".into();
        assert!(config.validate().is_err());

        let mut config = BumConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\n").unwrap();
        assert!(matches!(BumConfig::load_from(&path), Err(CliError::Config(_))));

        std::fs::write(&path, "[server]\nlisten = \"[::1]:8000\"\n").unwrap();
        assert_eq!(BumConfig::load_from(&path).unwrap().server.listen, "[::1]:8000");
    }

    #[test]
    fn dump_round_trips_through_toml() {
        let config = BumConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: BumConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.listen, config.server.listen);
    }
}
