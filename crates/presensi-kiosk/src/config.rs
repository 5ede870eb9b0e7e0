use crate::attendance::StatusPolicy;
use chrono::NaiveTime;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// System-wide config file, read when `PRESENSI_CONFIG` is unset.
pub const SYSTEM_CONFIG: &str = "/etc/presensi/presensi.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Kiosk configuration: defaults, then the TOML file, then `PRESENSI_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Identity catalog (`{"embeddings": [...], "names": [...]}`).
    pub catalog_path: PathBuf,
    /// Per-identity metadata (`{"NAME": {"org": .., "status": ..}}`).
    pub metadata_path: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    pub speech_cache_dir: PathBuf,
    pub speech_lang: String,
    /// Extension of synthesized audio files.
    pub speech_format: String,
    /// Synthesizer argv; `{text}`, `{lang}` and `{out}` are substituted.
    pub synth_command: Vec<String>,
    /// Player argv; `{file}` is substituted.
    pub player_command: Vec<String>,
    /// Synthesizer processes still running after this many seconds are killed.
    pub speech_timeout_secs: u64,
    /// Downscale factor applied before detection.
    pub process_scale: f32,
    /// Run recognition on every Nth frame.
    pub recognize_every: u32,
    /// Maximum Euclidean distance (exclusive) for a positive match.
    pub tolerance: f32,
    #[serde(deserialize_with = "clock_time")]
    pub check_in_cutoff: NaiveTime,
    #[serde(deserialize_with = "clock_time")]
    pub check_out_cutoff: NaiveTime,
    pub popup_secs: f32,
    /// Pause after a trigger before the next one is accepted.
    pub cooldown_ms: u64,
    /// Consecutive face-less recognition cycles tolerated before sleeping.
    pub sleep_after: u32,
    /// Whether to switch the physical display off while asleep.
    pub display_power: bool,
    pub backlight_dir: PathBuf,
    pub screen_width: u32,
    pub screen_height: u32,
    pub capture_stop_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = presensi_core::data_dir();
        let policy = StatusPolicy::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: presensi_core::default_model_dir(),
            catalog_path: data_dir.join("encodings.json"),
            metadata_path: data_dir.join("users.json"),
            db_path: data_dir.join("attendance.db"),
            speech_cache_dir: PathBuf::from("/tmp/presensi-speech"),
            speech_lang: "en".to_string(),
            speech_format: "mp3".to_string(),
            synth_command: argv(&["gtts-cli", "--lang", "{lang}", "--output", "{out}", "{text}"]),
            player_command: argv(&["mpg123", "-q", "{file}"]),
            speech_timeout_secs: 30,
            process_scale: 0.25,
            recognize_every: 6,
            tolerance: 0.45,
            check_in_cutoff: policy.check_in_cutoff,
            check_out_cutoff: policy.check_out_cutoff,
            popup_secs: 4.5,
            cooldown_ms: 550,
            sleep_after: 8,
            display_power: true,
            backlight_dir: PathBuf::from("/sys/class/backlight/rpi_backlight"),
            screen_width: 1024,
            screen_height: 600,
            capture_stop_timeout_ms: 1000,
        }
    }
}

impl Config {
    /// Resolve the full configuration for this process.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os("PRESENSI_CONFIG")
            .map(PathBuf::from)
            .or_else(|| {
                let system = PathBuf::from(SYSTEM_CONFIG);
                system.exists().then_some(system)
            });

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `PRESENSI_*` overrides. Unparseable values keep the current
    /// setting.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PRESENSI_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        self.camera_width = parsed(&var, "PRESENSI_CAMERA_WIDTH", self.camera_width);
        self.camera_height = parsed(&var, "PRESENSI_CAMERA_HEIGHT", self.camera_height);

        for (key, slot) in [
            ("PRESENSI_MODEL_DIR", &mut self.model_dir),
            ("PRESENSI_CATALOG", &mut self.catalog_path),
            ("PRESENSI_USERS", &mut self.metadata_path),
            ("PRESENSI_DB_PATH", &mut self.db_path),
            ("PRESENSI_SPEECH_CACHE", &mut self.speech_cache_dir),
            ("PRESENSI_BACKLIGHT", &mut self.backlight_dir),
        ] {
            if let Some(v) = var(key) {
                *slot = PathBuf::from(v);
            }
        }
        if let Some(v) = var("PRESENSI_SPEECH_LANG") {
            self.speech_lang = v;
        }

        self.speech_timeout_secs = parsed(&var, "PRESENSI_SPEECH_TIMEOUT_SECS", self.speech_timeout_secs);
        self.process_scale = parsed(&var, "PRESENSI_PROCESS_SCALE", self.process_scale);
        self.recognize_every = parsed(&var, "PRESENSI_RECOGNIZE_EVERY", self.recognize_every);
        self.tolerance = parsed(&var, "PRESENSI_TOLERANCE", self.tolerance);
        self.popup_secs = parsed(&var, "PRESENSI_POPUP_SECS", self.popup_secs);
        self.cooldown_ms = parsed(&var, "PRESENSI_COOLDOWN_MS", self.cooldown_ms);
        self.sleep_after = parsed(&var, "PRESENSI_SLEEP_AFTER", self.sleep_after);
        self.display_power = var("PRESENSI_DISPLAY_POWER")
            .map(|v| v != "0")
            .unwrap_or(self.display_power);

        for (key, slot) in [
            ("PRESENSI_CHECK_IN_CUTOFF", &mut self.check_in_cutoff),
            ("PRESENSI_CHECK_OUT_CUTOFF", &mut self.check_out_cutoff),
        ] {
            if let Some(v) = var(key) {
                match parse_clock(&v) {
                    Some(time) => *slot = time,
                    None => tracing::warn!(key, value = %v, current = %slot, "expected HH:MM; keeping current"),
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.process_scale > 0.0 && self.process_scale <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "process_scale",
                reason: format!("{} is outside (0, 1]", self.process_scale),
            });
        }
        if self.recognize_every == 0 {
            return Err(ConfigError::Invalid {
                key: "recognize_every",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.popup_secs.is_finite() && self.popup_secs >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "popup_secs",
                reason: format!("{} is not a duration", self.popup_secs),
            });
        }
        if self.speech_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "speech_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        for (key, argv) in [("synth_command", &self.synth_command), ("player_command", &self.player_command)] {
            if argv.is_empty() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "command is empty".into(),
                });
            }
        }
        Ok(())
    }

    pub fn status_policy(&self) -> StatusPolicy {
        StatusPolicy {
            check_in_cutoff: self.check_in_cutoff,
            check_out_cutoff: self.check_out_cutoff,
        }
    }

    pub fn popup_ttl(&self) -> Duration {
        Duration::from_secs_f32(self.popup_secs)
    }

    pub fn speech_timeout(&self) -> Duration {
        Duration::from_secs(self.speech_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn capture_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_stop_timeout_ms)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(current)
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn clock_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_clock(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected HH:MM, got '{raw}'")))
}
