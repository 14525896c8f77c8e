use rollcall_core::{
    CosineSimilarity, DayBoundary, DescriptorError, Embedding, Euclidean, Metric, Polarity,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest accepted patch side; descriptors grow with its square.
const MAX_PATCH_SIZE: u32 = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Distance function used for every comparison in one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cosine,
    Euclidean,
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(MetricKind::Cosine),
            "euclidean" => Ok(MetricKind::Euclidean),
            other => Err(other.to_string()),
        }
    }
}

/// Where the kiosk session is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KioskScope {
    /// Database row, exclusive across every daemon sharing the file.
    Shared,
    /// In-memory, exclusive within this process only.
    Process,
}

impl FromStr for KioskScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(KioskScope::Shared),
            "process" => Ok(KioskScope::Process),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(other.to_string()),
        }
    }
}

/// The metric chosen at startup.
#[derive(Debug, Clone, Copy)]
pub enum SelectedMetric {
    Cosine(CosineSimilarity),
    Euclidean(Euclidean),
}

impl SelectedMetric {
    pub fn new(kind: MetricKind, dim: usize) -> Self {
        match kind {
            MetricKind::Cosine => SelectedMetric::Cosine(CosineSimilarity { dim }),
            MetricKind::Euclidean => SelectedMetric::Euclidean(Euclidean { dim }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SelectedMetric::Cosine(_) => "cosine",
            SelectedMetric::Euclidean(_) => "euclidean",
        }
    }
}

impl Metric<Embedding> for SelectedMetric {
    fn polarity(&self) -> Polarity {
        match self {
            SelectedMetric::Cosine(m) => m.polarity(),
            SelectedMetric::Euclidean(m) => m.polarity(),
        }
    }

    fn score(&self, probe: &Embedding, candidate: &Embedding) -> f32 {
        match self {
            SelectedMetric::Cosine(m) => m.score(probe, candidate),
            SelectedMetric::Euclidean(m) => m.score(probe, candidate),
        }
    }

    fn validate(&self, descriptor: &Embedding) -> Result<(), DescriptorError> {
        match self {
            SelectedMetric::Cosine(m) => m.validate(descriptor),
            SelectedMetric::Euclidean(m) => m.validate(descriptor),
        }
    }
}

/// Optional TOML overlay; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    metric: Option<MetricKind>,
    match_threshold: Option<f32>,
    patch_size: Option<u32>,
    min_contrast: Option<f32>,
    capture_timeout_secs: Option<u64>,
    utc_offset_minutes: Option<i32>,
    kiosk_scope: Option<KioskScope>,
    working_days: Option<u32>,
    low_attendance_pct: Option<f64>,
    bus: Option<BusKind>,
}

/// Daemon configuration: defaults, then the `ROLLCALL_CONFIG` TOML file,
/// then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub metric: MetricKind,
    /// Exclusive match threshold, in the units of `metric`.
    pub match_threshold: f32,
    /// Side length of the square greyscale face patch.
    pub patch_size: u32,
    /// Grey-level standard deviation below which a capture has no face.
    pub min_contrast: f32,
    /// Deadline for extraction plus matching on one capture.
    pub capture_timeout: Duration,
    /// Fixed offset that defines the attendance calendar day.
    pub day: DayBoundary,
    pub kiosk_scope: KioskScope,
    /// School days per week for the low-attendance report.
    pub working_days: u32,
    /// Weekly attendance percentage below which a student is flagged.
    pub low_attendance_pct: f64,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("attendance.db"),
            metric: MetricKind::Cosine,
            match_threshold: 0.5,
            patch_size: 32,
            min_contrast: 8.0,
            capture_timeout: Duration::from_secs(10),
            day: DayBoundary::utc(),
            kiosk_scope: KioskScope::Shared,
            working_days: 5,
            low_attendance_pct: 50.0,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_overlay(file)
    }

    fn apply_overlay(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.metric {
            self.metric = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.patch_size {
            self.patch_size = v;
        }
        if let Some(v) = file.min_contrast {
            self.min_contrast = v;
        }
        if let Some(v) = file.capture_timeout_secs {
            self.capture_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.utc_offset_minutes {
            self.day = day_boundary("utc_offset_minutes", v)?;
        }
        if let Some(v) = file.kiosk_scope {
            self.kiosk_scope = v;
        }
        if let Some(v) = file.working_days {
            self.working_days = v;
        }
        if let Some(v) = file.low_attendance_pct {
            self.low_attendance_pct = v;
        }
        if let Some(v) = file.bus {
            self.bus = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_METRIC")? {
            self.metric = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_MATCH_THRESHOLD")? {
            self.match_threshold = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_PATCH_SIZE")? {
            self.patch_size = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_MIN_CONTRAST")? {
            self.min_contrast = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_CAPTURE_TIMEOUT_SECS")? {
            self.capture_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_UTC_OFFSET_MINUTES")? {
            self.day = day_boundary("ROLLCALL_UTC_OFFSET_MINUTES", v)?;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_KIOSK_SCOPE")? {
            self.kiosk_scope = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_WORKING_DAYS")? {
            self.working_days = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_LOW_ATTENDANCE_PCT")? {
            self.low_attendance_pct = v;
        }
        if let Some(v) = env_parse(&var, "ROLLCALL_BUS")? {
            self.bus = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                value: self.match_threshold.to_string(),
            });
        }
        if self.patch_size == 0 || self.patch_size > MAX_PATCH_SIZE {
            return Err(ConfigError::Invalid {
                key: "patch_size",
                value: self.patch_size.to_string(),
            });
        }
        if !self.min_contrast.is_finite() || self.min_contrast < 0.0 {
            return Err(ConfigError::Invalid {
                key: "min_contrast",
                value: self.min_contrast.to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.low_attendance_pct) {
            return Err(ConfigError::Invalid {
                key: "low_attendance_pct",
                value: self.low_attendance_pct.to_string(),
            });
        }
        if self.capture_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "capture_timeout_secs",
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Metric sized for the descriptors the patch extractor produces.
    pub fn selected_metric(&self) -> SelectedMetric {
        let side = self.patch_size as usize;
        SelectedMetric::new(self.metric, side * side)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn day_boundary(key: &'static str, minutes: i32) -> Result<DayBoundary, ConfigError> {
    DayBoundary::from_offset_minutes(minutes).ok_or_else(|| ConfigError::Invalid {
        key,
        value: minutes.to_string(),
    })
}

fn env_parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
