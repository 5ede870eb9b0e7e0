//! Display power control for kiosk sleep/wake.
//!
//! On a Raspberry Pi touchscreen both the HDMI/DSI output (`vcgencmd
//! display_power`) and the panel backlight (`bl_power` in sysfs) are toggled.
//! Either half may be missing on other hardware; each is attempted and the
//! first failure is reported.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    Exit {
        command: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("failed to write {path}: {source}")]
    Backlight {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Switches the physical display on or off.
pub trait DisplayPower: Send + Sync {
    fn set_power(&self, on: bool) -> Result<(), DisplayError>;
}

/// Raspberry Pi display: firmware output plus backlight.
#[derive(Debug, Clone)]
pub struct RpiDisplay {
    backlight_dir: PathBuf,
}

impl RpiDisplay {
    pub fn new(backlight_dir: impl Into<PathBuf>) -> Self {
        Self {
            backlight_dir: backlight_dir.into(),
        }
    }

    fn firmware_power(on: bool) -> Result<(), DisplayError> {
        const COMMAND: &str = "vcgencmd";
        let status = Command::new(COMMAND)
            .args(["display_power", if on { "1" } else { "0" }])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| DisplayError::Spawn { command: COMMAND, source })?;
        if status.success() {
            Ok(())
        } else {
            Err(DisplayError::Exit { command: COMMAND, status })
        }
    }

    /// `bl_power` is inverted: 0 means backlight on.
    fn backlight_power(dir: &Path, on: bool) -> Result<(), DisplayError> {
        let path = dir.join("bl_power");
        std::fs::write(&path, if on { "0" } else { "1" }).map_err(|source| DisplayError::Backlight {
            path: path.display().to_string(),
            source,
        })
    }
}

impl DisplayPower for RpiDisplay {
    fn set_power(&self, on: bool) -> Result<(), DisplayError> {
        tracing::debug!(on, backlight = %self.backlight_dir.display(), "setting display power");
        let firmware = Self::firmware_power(on);
        let backlight = Self::backlight_power(&self.backlight_dir, on);
        firmware.and(backlight)
    }
}

/// No-op backend for desktops and when display control is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl DisplayPower for NullDisplay {
    fn set_power(&self, on: bool) -> Result<(), DisplayError> {
        tracing::debug!(on, "display power control disabled");
        Ok(())
    }
}
