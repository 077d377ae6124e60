use crate::constants::{defaults, pigpiod, pins, timing};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("Interval must be at least {min} ms (got {got} ms)")]
    IntervalTooShort { got: u64, min: u64 },

    #[error("Total time ({total} ms) is shorter than the interval ({interval} ms)")]
    TotalShorterThanInterval { total: u64, interval: u64 },

    #[error("{axis} angle {angle} is outside -90..90")]
    AngleOutOfRange { axis: &'static str, angle: f64 },

    #[error("Invalid file name '{0}'")]
    BadFileName(String),

    #[error("Flash time ({flash} ms) must be shorter than the interval ({interval} ms)")]
    FlashTooLong { flash: u64, interval: u64 },

    #[error("JPEG quality must be between 1 and 100 (got {0})")]
    BadQuality(u8),

    #[error("Invalid time '{0}': use seconds (e.g. 2.5) or h:mm:ss")]
    BadTime(String),
}

/// How the rig reaches the header pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    /// Through the pigpio daemon at `gpio_host:gpio_port`.
    #[default]
    Pigpiod,
    /// Directly, through `/dev/gpiomem`.
    Local,
}

/// Everything the rig remembers between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub file_name: String,
    pub interval_ms: u64,
    /// 0 means "until stopped".
    pub total_time_ms: u64,
    pub pan_angle: f64,
    pub tilt_angle: f64,

    pub led_pin: u32,
    pub pan_pin: u32,
    pub tilt_pin: u32,
    pub gpio_backend: GpioBackend,
    pub gpio_host: String,
    pub gpio_port: u16,

    pub flash_ms: u64,
    pub warmup_ms: u64,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl Default for Settings {
    fn default() -> Self {
        let base_dir = home_dir()
            .map(|home| home.join(defaults::BASE_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            base_dir,
            file_name: defaults::FILE_NAME.to_string(),
            interval_ms: defaults::INTERVAL_MS,
            total_time_ms: defaults::TOTAL_TIME_MS,
            pan_angle: 0.0,
            tilt_angle: 0.0,
            led_pin: pins::LED,
            pan_pin: pins::PAN,
            tilt_pin: pins::TILT,
            gpio_backend: GpioBackend::default(),
            gpio_host: pigpiod::HOST.to_string(),
            gpio_port: pigpiod::PORT,
            flash_ms: defaults::FLASH_MS,
            warmup_ms: defaults::WARMUP_MS,
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            quality: defaults::QUALITY,
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(PathBuf::from)
}

pub fn get_settings_file_path() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".picam-rig.json"))
}

impl Settings {
    pub fn load() -> Result<Self> {
        let path = get_settings_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable settings {}: {}", path.display(), e);
            Self::default()
        });

        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        let path = get_settings_file_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::debug!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.interval_ms < timing::MIN_INTERVAL_MS {
            return Err(SettingsError::IntervalTooShort {
                got: self.interval_ms,
                min: timing::MIN_INTERVAL_MS,
            });
        }
        if self.total_time_ms != 0 && self.total_time_ms < self.interval_ms {
            return Err(SettingsError::TotalShorterThanInterval {
                total: self.total_time_ms,
                interval: self.interval_ms,
            });
        }
        if self.flash_ms >= self.interval_ms {
            return Err(SettingsError::FlashTooLong {
                flash: self.flash_ms,
                interval: self.interval_ms,
            });
        }
        self.validate_angles()?;

        let name = self.file_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(SettingsError::BadFileName(self.file_name.clone()));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(SettingsError::BadQuality(self.quality));
        }
        Ok(())
    }

    /// The part of `validate` that matters before the servos move.
    pub fn validate_angles(&self) -> Result<(), SettingsError> {
        check_angle("Pan", self.pan_angle)?;
        check_angle("Tilt", self.tilt_angle)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn total_time(&self) -> Option<Duration> {
        (self.total_time_ms > 0).then(|| Duration::from_millis(self.total_time_ms))
    }

    /// Output path handed to the capture tool; `%04d` is its frame counter.
    pub fn frame_pattern(&self) -> PathBuf {
        self.base_dir
            .join(format!("{}_%04d.jpg", self.file_name.trim()))
    }

    pub fn planned_shots(&self) -> Option<u64> {
        planned_shots(self.interval_ms, self.total_time_ms)
    }
}

pub fn check_angle(axis: &'static str, angle: f64) -> Result<(), SettingsError> {
    if angle.is_finite() && (-90.0..=90.0).contains(&angle) {
        Ok(())
    } else {
        Err(SettingsError::AngleOutOfRange { axis, angle })
    }
}

/// Shots fired at 0, interval, 2*interval, ... strictly before `total_ms`.
pub fn planned_shots(interval_ms: u64, total_ms: u64) -> Option<u64> {
    if interval_ms == 0 || total_ms == 0 {
        return None;
    }
    Some(total_ms.div_ceil(interval_ms))
}

/// Parses "2.5" (seconds), "mm:ss" or "h:mm:ss" into milliseconds.
pub fn parse_seconds(text: &str) -> Result<u64, SettingsError> {
    let text = text.trim();
    let bad = || SettingsError::BadTime(text.to_string());

    if text.is_empty() {
        return Err(bad());
    }

    if text.contains(':') {
        let parts: Vec<&str> = text.split(':').map(str::trim).collect();
        if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(bad());
        }

        let (leading, last) = parts.split_at(parts.len() - 1);
        let seconds: f64 = last[0].parse().map_err(|_| bad())?;
        if !seconds.is_finite() || !(0.0..60.0).contains(&seconds) {
            return Err(bad());
        }

        let mut whole: u64 = 0;
        for (i, part) in leading.iter().enumerate() {
            let value: u64 = part.parse().map_err(|_| bad())?;
            // Minutes after an hour field must stay below 60
            if i > 0 && value >= 60 {
                return Err(bad());
            }
            whole = whole
                .checked_mul(60)
                .and_then(|w| w.checked_add(value))
                .ok_or_else(bad)?;
        }

        let ms = whole
            .checked_mul(60_000)
            .and_then(|w| w.checked_add((seconds * 1000.0).round() as u64))
            .filter(|ms| *ms <= timing::MAX_TIME_MS)
            .ok_or_else(bad)?;
        return Ok(ms);
    }

    let seconds: f64 = text.parse().map_err(|_| bad())?;
    if !seconds.is_finite() || seconds < 0.0 || seconds * 1000.0 > timing::MAX_TIME_MS as f64 {
        return Err(bad());
    }
    Ok((seconds * 1000.0).round() as u64)
}

/// Inverse of `parse_seconds` for the plain-seconds form.
pub fn format_seconds(ms: u64) -> String {
    format!("{}", ms as f64 / 1000.0)
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
