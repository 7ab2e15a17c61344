//! # Project configuration.
//!
//! A project is described by a JSON document deserialized into [`RawConfig`] (every
//! field optional), validated in one pass, and turned into an immutable [`Config`]
//! whose derived fields are computed once:
//!
//! - `proj_id` = `{owner}_{tank_id}_{species}_{created:%m%d%y}`
//! - `hit_thresh` = ⌈`hit_thresh_secs` / `interval_secs`⌉ frames
//! - `buffer_len` = ⌈`img_buffer_secs` / `interval_secs`⌉ frames
//! - `end` = `end_date` at `end_time` (23:59:59 when omitted); no `end_date`, no end
//! - project directories under `data_dir`
//!
//! The resulting `Arc<Config>` is handed to every worker at construction; nothing
//! mutates it afterwards.
//!
//! ## Example
//! ```rust
//! use fishvisor::Config;
//!
//! let cfg = Config::from_json_str(r#"{
//!     "owner": "abc", "email": "abc@lab.org", "tank_id": "t1", "species": "mz",
//!     "created": "2024-03-05", "data_dir": "/tmp/fish"
//! }"#).unwrap();
//! assert_eq!(cfg.proj_id, "abc_t1_mz_030524");
//! assert_eq!(cfg.hit_thresh, 10);
//! assert_eq!(cfg.buffer_len, 60);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SupervisionConfig;
use crate::detection::HitParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required fields: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("invalid fields: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Missing(_) => "config_missing",
            ConfigError::Invalid(_) => "config_invalid",
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse(_) => "config_parse",
        }
    }
}

/// Tuning knobs with defaults; rarely changed per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub max_subjects: usize,
    pub conf_thresh: f32,
    pub interval_secs: f64,
    pub hit_thresh_secs: f64,
    pub img_buffer_secs: f64,
    pub start_hour: u32,
    pub end_hour: u32,
    pub min_notification_interval: u64,
    pub framerate: u32,
    pub max_upload_workers: usize,
    pub max_tries: u32,
    pub startup_wait_secs: f64,
    pub shutdown_wait_secs: f64,
    pub max_idle_secs: u64,
    pub raw_ext: String,
    pub std_ext: String,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            max_subjects: 5,
            conf_thresh: 0.4,
            interval_secs: 0.5,
            hit_thresh_secs: 5.0,
            img_buffer_secs: 30.0,
            start_hour: 8,
            end_hour: 18,
            min_notification_interval: 600,
            framerate: 30,
            max_upload_workers: 3,
            max_tries: 3,
            startup_wait_secs: 10.0,
            shutdown_wait_secs: 10.0,
            max_idle_secs: 600,
            raw_ext: "h264".to_string(),
            std_ext: "mp4".to_string(),
        }
    }
}

/// Configuration as stored on disk. Required fields are optional here so that
/// validation can report all of them at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub owner: Option<String>,
    pub email: Option<String>,
    pub tank_id: Option<String>,
    pub species: Option<String>,
    pub created: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    /// Seconds after start at which the runner shuts itself down.
    pub kill_after: Option<u64>,
    /// Directory of still images replayed instead of a live camera.
    pub source: Option<PathBuf>,
    pub subject_class: Option<u32>,
    pub site_class: Option<u32>,
    pub data_dir: Option<PathBuf>,
    pub sentinel_dir: Option<PathBuf>,
    pub cloud_root: Option<String>,
    pub advanced: AdvancedConfig,
}

const REQUIRED: [&str; 4] = ["owner", "email", "tank_id", "species"];

/// Upper bound for every configured duration given in seconds.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

fn pattern(re: &str) -> Result<Regex, ConfigError> {
    Regex::new(re).map_err(|e| ConfigError::Invalid(vec![e.to_string()]))
}

impl RawConfig {
    /// Checks every field and reports all problems of the first failing kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let present = [&self.owner, &self.email, &self.tank_id, &self.species];
        let missing: Vec<String> = REQUIRED
            .iter()
            .zip(present)
            .filter(|(_, v)| v.as_deref().map_or(true, |s| s.trim().is_empty()))
            .map(|(k, _)| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let mut invalid = Vec::new();
        let owner_re = pattern(r"^[a-z]{3}$")?;
        let email_re = pattern(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")?;
        if let Some(owner) = &self.owner {
            if !owner_re.is_match(owner) {
                invalid.push(format!("owner {owner:?} must be three lowercase initials"));
            }
        }
        if let Some(email) = &self.email {
            if !email_re.is_match(email) {
                invalid.push(format!("email {email:?} is not an address"));
            }
        }
        let adv = &self.advanced;
        if !(adv.interval_secs > 0.0) {
            invalid.push("interval_secs must be positive".to_string());
        }
        for (name, secs) in [
            ("interval_secs", adv.interval_secs),
            ("startup_wait_secs", adv.startup_wait_secs),
            ("shutdown_wait_secs", adv.shutdown_wait_secs),
        ] {
            if !secs.is_finite() || secs > MAX_DURATION_SECS {
                invalid.push(format!("{name} must not exceed {MAX_DURATION_SECS} seconds"));
            }
        }
        if !(0.0..1.0).contains(&adv.conf_thresh) {
            invalid.push("conf_thresh must be in [0, 1)".to_string());
        }
        if adv.start_hour > 23 || adv.end_hour > 23 {
            invalid.push("start_hour and end_hour must be below 24".to_string());
        }
        if adv.raw_ext == adv.std_ext {
            invalid.push("raw_ext and std_ext must differ".to_string());
        }
        if self.end_time.is_some() && self.end_date.is_none() {
            invalid.push("end_time given without end_date".to_string());
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(invalid))
        }
    }
}

/// Validated, immutable project configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub owner: String,
    pub email: String,
    pub tank_id: String,
    pub species: String,
    pub created: NaiveDate,
    pub proj_id: String,
    /// Project end; the runner enters End mode once it has passed.
    pub end: Option<NaiveDateTime>,
    pub kill_after: Option<Duration>,
    pub source: Option<PathBuf>,
    pub subject_class: u32,
    pub site_class: u32,
    pub data_dir: PathBuf,
    pub proj_dir: PathBuf,
    pub video_dir: PathBuf,
    pub image_dir: PathBuf,
    pub sentinel_dir: PathBuf,
    pub cloud_root: String,
    /// Net hits needed to trigger, in frames.
    pub hit_thresh: u32,
    /// Evidence buffer length, in frames.
    pub buffer_len: usize,
    pub advanced: AdvancedConfig,
}

fn frames(secs: f64, interval_secs: f64) -> u64 {
    ((secs / interval_secs).ceil() as u64).max(1)
}

impl Config {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        raw.validate()?;
        let RawConfig {
            owner,
            email,
            tank_id,
            species,
            created,
            end_date,
            end_time,
            kill_after,
            source,
            subject_class,
            site_class,
            data_dir,
            sentinel_dir,
            cloud_root,
            advanced,
        } = raw;
        let (Some(owner), Some(email), Some(tank_id), Some(species)) =
            (owner, email, tank_id, species)
        else {
            return Err(ConfigError::Missing(
                REQUIRED.iter().map(|s| s.to_string()).collect(),
            ));
        };

        let created = created.unwrap_or_else(|| Local::now().date_naive());
        let proj_id = format!(
            "{owner}_{tank_id}_{species}_{}",
            created.format("%m%d%y")
        );
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let proj_dir = data_dir.join(&proj_id);
        let sentinel_dir = sentinel_dir.unwrap_or_else(|| data_dir.join("sentinels"));

        Ok(Self {
            end: end_date.map(|d| d.and_time(end_time.unwrap_or_else(end_of_day))),
            kill_after: kill_after.map(Duration::from_secs),
            subject_class: subject_class.unwrap_or(0),
            site_class: site_class.unwrap_or(1),
            video_dir: proj_dir.join("Videos"),
            image_dir: proj_dir.join("Images"),
            cloud_root: cloud_root.unwrap_or_else(|| "cloudstorage:".to_string()),
            hit_thresh: frames(advanced.hit_thresh_secs, advanced.interval_secs) as u32,
            buffer_len: frames(advanced.img_buffer_secs, advanced.interval_secs) as usize,
            owner,
            email,
            tank_id,
            species,
            created,
            proj_id,
            source,
            data_dir,
            proj_dir,
            sentinel_dir,
            advanced,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_raw(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Creates the project, video, image and sentinel directories.
    pub fn create_project_tree(&self) -> std::io::Result<()> {
        for dir in [
            &self.proj_dir,
            &self.video_dir,
            &self.image_dir,
            &self.sentinel_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn supervision(&self) -> SupervisionConfig {
        SupervisionConfig {
            startup_wait: Duration::from_secs_f64(self.advanced.startup_wait_secs.max(0.0)),
            shutdown_wait: Duration::from_secs_f64(self.advanced.shutdown_wait_secs.max(0.0)),
            max_tries: self.advanced.max_tries,
            ..SupervisionConfig::default()
        }
    }

    pub fn hit_params(&self) -> HitParams {
        HitParams {
            subject_class: self.subject_class,
            site_class: self.site_class,
            max_subjects: self.advanced.max_subjects,
            conf_thresh: self.advanced.conf_thresh,
            hit_thresh: self.hit_thresh,
            buffer_len: self.buffer_len,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.advanced.interval_secs)
    }

    pub fn min_notification_interval(&self) -> Duration {
        Duration::from_secs(self.advanced.min_notification_interval)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.advanced.max_idle_secs)
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("__ProjectData")
}
