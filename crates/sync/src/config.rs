use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use threadline_backend::DEFAULT_CHANNEL_PREFIX;

pub const SETTINGS_DIRECTORY_NAME: &str = "threadline";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "THREADLINE_";

pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_UNSUBSCRIBE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    #[serde(default = "default_unsubscribe_timeout_ms")]
    pub unsubscribe_timeout_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Append sent messages locally instead of waiting for the realtime echo.
    #[serde(default)]
    pub optimistic_echo: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            subscribe_timeout_ms: DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            unsubscribe_timeout_ms: DEFAULT_UNSUBSCRIBE_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            optimistic_echo: false,
        }
    }
}

impl SyncSettings {
    pub fn from_figment(figment: &Figment) -> Result<Self, figment::Error> {
        figment.extract::<Self>().map(Self::normalized)
    }

    pub fn with_optimistic_echo(mut self, enabled: bool) -> Self {
        self.optimistic_echo = enabled;
        self
    }

    pub fn normalized(mut self) -> Self {
        self.channel_prefix = self.channel_prefix.trim().to_string();
        if self.channel_prefix.is_empty() {
            self.channel_prefix = default_channel_prefix();
        }

        // Zero would turn every collaborator call into an immediate timeout.
        if self.fetch_timeout_ms == 0 {
            self.fetch_timeout_ms = DEFAULT_FETCH_TIMEOUT_MS;
        }
        if self.subscribe_timeout_ms == 0 {
            self.subscribe_timeout_ms = DEFAULT_SUBSCRIBE_TIMEOUT_MS;
        }
        if self.unsubscribe_timeout_ms == 0 {
            self.unsubscribe_timeout_ms = DEFAULT_UNSUBSCRIBE_TIMEOUT_MS;
        }
        if self.send_timeout_ms == 0 {
            self.send_timeout_ms = DEFAULT_SEND_TIMEOUT_MS;
        }

        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn unsubscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<SyncSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".threadline"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<SyncSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: SyncSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> SyncSettings {
        if !path.exists() {
            tracing::info!(?path, "settings file not found, using defaults and environment");
        }

        let figment = Figment::from(Serialized::defaults(SyncSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match SyncSettings::from_figment(&figment) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(?path, %error, "failed to parse settings, using defaults");
                SyncSettings::default()
            }
        }
    }

    fn persist(&self, settings: &SyncSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_channel_prefix() -> String {
    DEFAULT_CHANNEL_PREFIX.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_subscribe_timeout_ms() -> u64 {
    DEFAULT_SUBSCRIBE_TIMEOUT_MS
}

fn default_unsubscribe_timeout_ms() -> u64 {
    DEFAULT_UNSUBSCRIBE_TIMEOUT_MS
}

fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}
