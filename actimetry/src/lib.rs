//! Functional arm-use metrics from paired wrist accelerometer recordings.
//!
//! Raw paretic/non-paretic streams are resampled, low-pass filtered, aligned,
//! cut into fixed epochs and reduced to clinical indicators (elevation angle,
//! functional-use flags, daily counts, use-hours, jerk and use ratios).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod classify;
pub mod dataset;
pub mod filter;
pub mod ratio;
pub mod resample;
pub mod session;
pub mod signal;
pub mod window;

pub use aggregate::{functional_count_per_day, smoothed_start_seconds, use_hours};
pub use classify::{classify_functional, elevation_angle, elevation_angles, is_functional_epoch};
pub use dataset::{parse_readings, read_readings, DataLayout, Participant, ParticipantTable};
pub use filter::{low_pass, mean_sampling_interval, Butterworth};
pub use ratio::{
    daily_use_ratio, epoch_jerk_magnitude, epoch_jerk_ratio, jerk_ratio, ratio, total_use_ratio,
};
pub use resample::{align, resample, AlignedPair, RawSample, UniformSeries};
pub use session::{
    analyze_session, extract_session, run_session, SessionData, SessionInput, SessionMetrics,
};
pub use signal::{compute_jerk, euclidean_norm, JerkTensor};
pub use window::{partition, Epochs};

#[derive(Error, Debug)]
pub enum ActimetryError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("filter cutoff {cutoff_hz} Hz must be below the Nyquist frequency {nyquist_hz:.4} Hz")]
    InvalidCutoff { cutoff_hz: f64, nyquist_hz: f64 },
    #[error("window of {seconds_per_window} s holds no samples at a sampling interval of {delta_t_s} s")]
    DegenerateWindow {
        seconds_per_window: f64,
        delta_t_s: f64,
    },
    #[error("{samples} samples span {span_s:.0} s, too sparse for a {step_ms} ms grid")]
    SparseTimeline {
        samples: usize,
        span_s: f64,
        step_ms: i64,
    },
    #[error("aligned recording is empty")]
    AlignmentEmpty,
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse readings: {0}")]
    ReadingsParse(String),
    #[error("participant metadata: {0}")]
    Metadata(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session {session}: {source}")]
    Session {
        session: String,
        #[source]
        source: Box<ActimetryError>,
    },
}

impl ActimetryError {
    /// Attach the session identifier, keeping an existing one untouched.
    pub fn in_session(self, session: &str) -> Self {
        match self {
            err @ ActimetryError::Session { .. } => err,
            other => ActimetryError::Session {
                session: session.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Arm index in every tensor: non-paretic first, paretic second.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Arm {
    NonParetic = 0,
    Paretic = 1,
}

impl Arm {
    pub const ALL: [Arm; 2] = [Arm::NonParetic, Arm::Paretic];

    pub fn index(self) -> usize {
        self as usize
    }
}

pub const NUM_ARMS: usize = 2;

/// Channel index on the last tensor axis.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    X = 0,
    Y = 1,
    Z = 2,
    Norm = 3,
}

impl Channel {
    pub fn index(self) -> usize {
        self as usize
    }
}

pub const NUM_CHANNELS: usize = 4;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ActimetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(ActimetryError::Metadata(format!(
                "paretic side must be 'left' or 'right', got '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter_cutoff_hz: Option<f64>,
    pub resampling_freq_hz: Option<f64>,
    pub seconds_per_window: f64,
    pub symmetry_threshold_deg: f64,
    pub amplitude_threshold_deg: f64,
    pub jerk_removal_threshold: f64,
    pub activity_threshold: f64,
    /// Cohort month/version selecting the participant metadata file.
    pub month: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_cutoff_hz: Some(1.0),
            resampling_freq_hz: Some(50.0),
            seconds_per_window: 5.0,
            symmetry_threshold_deg: 30.0,
            amplitude_threshold_deg: 30.0,
            jerk_removal_threshold: 0.0,
            activity_threshold: 0.0,
            month: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ActimetryError> {
        if let Some(freq) = self.resampling_freq_hz {
            resample::grid_step_us(freq)?;
        }
        if let Some(cutoff) = self.filter_cutoff_hz {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(ActimetryError::Configuration(format!(
                    "filter cutoff must be positive, got {cutoff}"
                )));
            }
        }
        if !(self.seconds_per_window.is_finite() && self.seconds_per_window > 0.0) {
            return Err(ActimetryError::Configuration(format!(
                "window duration must be positive, got {}",
                self.seconds_per_window
            )));
        }
        let thresholds = [
            ("symmetry_threshold_deg", self.symmetry_threshold_deg),
            ("amplitude_threshold_deg", self.amplitude_threshold_deg),
            ("jerk_removal_threshold", self.jerk_removal_threshold),
            ("activity_threshold", self.activity_threshold),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(ActimetryError::Configuration(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// The metadata month, failing when no cohort context was supplied.
    pub fn require_month(&self) -> Result<&str, ActimetryError> {
        self.month.as_deref().ok_or_else(|| {
            ActimetryError::Configuration(
                "a month must be specified to look up participant metadata".into(),
            )
        })
    }

    pub fn from_json_str(input: &str) -> Result<Self, ActimetryError> {
        serde_json::from_str(input)
            .map_err(|e| ActimetryError::Configuration(format!("invalid config JSON: {e}")))
    }

    /// Read a JSON config; missing keys keep their defaults.
    pub fn load_json(path: &Path) -> Result<Self, ActimetryError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn symmetry_threshold_rad(&self) -> f64 {
        self.symmetry_threshold_deg.to_radians()
    }

    pub fn amplitude_threshold_rad(&self) -> f64 {
        self.amplitude_threshold_deg.to_radians()
    }
}
