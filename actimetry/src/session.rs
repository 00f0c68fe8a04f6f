//! Per-session pipeline: raw readings in, clinical metrics out.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array3};
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{functional_count_per_day, use_hours};
use crate::classify::{classify_functional, elevation_angles};
use crate::dataset::{read_readings, DataLayout, Participant};
use crate::filter::{mean_sampling_interval, Butterworth, FILTER_ORDER};
use crate::ratio::{daily_use_ratio, epoch_jerk_magnitude, epoch_jerk_ratio, jerk_ratio, total_use_ratio};
use crate::resample::{align, resample, RawSample, UniformSeries};
use crate::signal::compute_jerk;
use crate::window::partition;
use crate::{ActimetryError, Arm, Channel, PipelineConfig, Side, NUM_ARMS};

/// Raw readings of both wrists for one participant.
#[derive(Clone, Debug)]
pub struct SessionInput {
    pub participant: Participant,
    pub paretic: Vec<RawSample>,
    pub non_paretic: Vec<RawSample>,
}

impl SessionInput {
    /// Read both sides from the study layout, mapping left/right to paretic/non-paretic.
    pub fn load(layout: &DataLayout, participant: &Participant) -> Result<Self, ActimetryError> {
        let read_side = |side: Side| {
            let path = layout.readings_path(&participant.session, side);
            read_readings(&path).map_err(|e| e.in_session(&participant.session))
        };
        Ok(Self {
            participant: participant.clone(),
            paretic: read_side(participant.paretic_side)?,
            non_paretic: read_side(participant.non_paretic_side())?,
        })
    }

    pub fn session(&self) -> &str {
        &self.participant.session
    }
}

/// Aligned, filtered acceleration of one session.
#[derive(Clone, Debug)]
pub struct SessionData {
    pub session: String,
    /// Shared time index, microseconds since the Unix epoch.
    pub times: Array1<i64>,
    /// `(time, arm, channel)`, arm 0 non-paretic and arm 1 paretic.
    pub acceleration: Array3<f64>,
    pub is_patient: bool,
    pub fm_score: Option<f64>,
    pub paretic_side: Side,
}

impl SessionData {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        self.times.first().copied().and_then(DateTime::from_timestamp_micros)
    }
}

fn prepare_side(
    samples: &[RawSample],
    config: &PipelineConfig,
    arm: Arm,
) -> Result<UniformSeries, ActimetryError> {
    let mut series = resample(samples, config.resampling_freq_hz)?;
    debug!(?arm, raw = samples.len(), resampled = series.len(), "resampled");
    if series.is_empty() {
        return Err(ActimetryError::AlignmentEmpty);
    }

    let Some(cutoff_hz) = config.filter_cutoff_hz else {
        return Ok(series);
    };
    let delta_t = mean_sampling_interval(&series.times)?;
    let filter = Butterworth::lowpass(FILTER_ORDER, cutoff_hz, delta_t)?;
    for channel in [Channel::X, Channel::Y, Channel::Z] {
        let column = series.channels.column(channel.index()).to_vec();
        let filtered = filter.filtfilt(&column)?;
        series
            .channels
            .column_mut(channel.index())
            .assign(&Array1::from(filtered));
    }
    series.recompute_norm();
    debug!(?arm, delta_t, cutoff_hz, "filtered");
    Ok(series)
}

/// Resample, filter and align both arms into one acceleration tensor.
pub fn extract_session(input: &SessionInput, config: &PipelineConfig) -> Result<SessionData, ActimetryError> {
    config.validate()?;
    let non_paretic = prepare_side(&input.non_paretic, config, Arm::NonParetic)?;
    let paretic = prepare_side(&input.paretic, config, Arm::Paretic)?;

    let pair = align(&non_paretic, &paretic);
    if pair.is_empty() {
        return Err(ActimetryError::AlignmentEmpty);
    }
    debug!(session = input.session(), aligned = pair.len(), "aligned");

    Ok(SessionData {
        session: input.participant.session.clone(),
        times: pair.times().clone(),
        acceleration: pair.to_tensor(),
        is_patient: input.participant.is_patient,
        fm_score: input.participant.fm_score,
        paretic_side: input.participant.paretic_side,
    })
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct JerkSummary {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Samples left after paired removal, NaN ratios included.
    pub retained: usize,
}

impl JerkSummary {
    fn from_ratios(ratios: &Array1<f64>) -> Self {
        let mut finite: Vec<f64> = ratios.iter().copied().filter(|r| r.is_finite()).collect();
        if finite.is_empty() {
            return Self {
                retained: ratios.len(),
                ..Self::default()
            };
        }
        finite.sort_by(|a, b| a.total_cmp(b));
        let n = finite.len();
        let median = if n % 2 == 1 {
            finite[n / 2]
        } else {
            0.5 * (finite[n / 2 - 1] + finite[n / 2])
        };
        Self {
            mean: Some(finite.iter().sum::<f64>() / n as f64),
            median: Some(median),
            retained: ratios.len(),
        }
    }
}

/// Everything computed for one session. Per-arm pairs are `[non_paretic, paretic]`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionMetrics {
    pub session: String,
    pub is_patient: bool,
    pub fm_score: Option<f64>,
    pub paretic_side: Side,
    pub start_time: Option<DateTime<Utc>>,
    pub num_samples: usize,
    pub window_size: usize,
    pub num_epochs: usize,
    pub epoch_start_seconds: Vec<usize>,
    pub functional: Vec<[bool; NUM_ARMS]>,
    pub functional_epochs: [usize; NUM_ARMS],
    pub daily_counts: Vec<[usize; NUM_ARMS]>,
    pub daily_use_ratio: Vec<f64>,
    pub use_hours: [f64; NUM_ARMS],
    pub total_use_ratio: f64,
    pub jerk_ratio: JerkSummary,
    pub epoch_jerk_ratio: Vec<f64>,
}

impl SessionMetrics {
    pub fn num_days(&self) -> usize {
        self.daily_counts.len()
    }
}

fn arm_pair<T: Copy>(values: impl IntoIterator<Item = T>, fill: T) -> [T; NUM_ARMS] {
    let mut out = [fill; NUM_ARMS];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value;
    }
    out
}

/// Epochs, angles, functional use, daily aggregates and ratios of an extracted session.
pub fn analyze_session(data: &SessionData, config: &PipelineConfig) -> Result<SessionMetrics, ActimetryError> {
    let epochs = partition(&data.acceleration, &data.times, config.seconds_per_window)?;
    debug!(
        session = %data.session,
        window_size = epochs.window_size,
        epochs = epochs.len(),
        "partitioned"
    );

    let angles = elevation_angles(&epochs);
    let functional = classify_functional(
        &angles,
        config.symmetry_threshold_rad(),
        config.amplitude_threshold_rad(),
    );
    let total_ratio = total_use_ratio(&functional)?;
    let start_seconds = epochs.start_seconds();
    let daily_counts = functional_count_per_day(&functional, &start_seconds)?;
    let daily_ratio = daily_use_ratio(&daily_counts)?;
    let hours = use_hours(&functional, &start_seconds, config.activity_threshold)?;

    let jerk = compute_jerk(&data.acceleration, &data.times)?;
    let sample_ratio = jerk_ratio(&jerk.data, config.jerk_removal_threshold)?;
    let jerk_epochs = partition(&jerk.data, &jerk.times, config.seconds_per_window)?;
    let epoch_ratio = epoch_jerk_ratio(
        &epoch_jerk_magnitude(&jerk_epochs.data),
        config.jerk_removal_threshold,
    )?;
    debug!(
        session = %data.session,
        days = daily_counts.nrows(),
        jerk_samples = sample_ratio.len(),
        "aggregated"
    );

    let functional_epochs = arm_pair(
        functional
            .columns()
            .into_iter()
            .map(|column| column.iter().filter(|&&f| f).count()),
        0,
    );

    Ok(SessionMetrics {
        session: data.session.clone(),
        is_patient: data.is_patient,
        fm_score: data.fm_score,
        paretic_side: data.paretic_side,
        start_time: data.start_datetime(),
        num_samples: data.len(),
        window_size: epochs.window_size,
        num_epochs: epochs.len(),
        epoch_start_seconds: start_seconds,
        functional: functional
            .rows()
            .into_iter()
            .map(|row| arm_pair(row.iter().copied(), false))
            .collect(),
        functional_epochs,
        daily_counts: daily_counts
            .rows()
            .into_iter()
            .map(|row| arm_pair(row.iter().copied(), 0))
            .collect(),
        daily_use_ratio: daily_ratio.to_vec(),
        use_hours: arm_pair(hours.iter().copied(), 0.0),
        total_use_ratio: total_ratio,
        jerk_ratio: JerkSummary::from_ratios(&sample_ratio),
        epoch_jerk_ratio: epoch_ratio.to_vec(),
    })
}

/// Full pipeline for one session. Any failure carries the session identifier.
pub fn run_session(input: &SessionInput, config: &PipelineConfig) -> Result<SessionMetrics, ActimetryError> {
    extract_session(input, config)
        .and_then(|data| analyze_session(&data, config))
        .map_err(|e| e.in_session(input.session()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_US: i64 = 20_000;
    const BASE_US: i64 = 1_709_251_200_000_000;

    fn participant() -> Participant {
        Participant {
            session: "P01".into(),
            is_patient: true,
            fm_score: Some(48.0),
            paretic_side: Side::Right,
        }
    }

    /// Forearm held at a fixed elevation, `n` samples from `offset_us`.
    fn held(n: usize, offset_us: i64, alpha_deg: f64) -> Vec<RawSample> {
        let alpha = alpha_deg.to_radians();
        (0..n as i64)
            .map(|i| RawSample::new(BASE_US + offset_us + i * STEP_US, alpha.cos(), -alpha.sin(), 0.0))
            .collect()
    }

    fn input(non_paretic: Vec<RawSample>, paretic: Vec<RawSample>) -> SessionInput {
        SessionInput {
            participant: participant(),
            paretic,
            non_paretic,
        }
    }

    #[test]
    fn test_extract_aligns_to_later_start() {
        let data = extract_session(
            &input(held(3000, 0, 0.0), held(3000, 1_000_000, 0.0)),
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(data.len(), 3000 - 50);
        assert_eq!(data.times[0], BASE_US + 1_000_000);
        assert_eq!(data.acceleration.dim(), (2950, NUM_ARMS, 4));
        assert!(data.is_patient);
        assert_eq!(data.fm_score, Some(48.0));
        // A constant signal survives the filter and the norm is rebuilt.
        assert!((data.acceleration[[100, 1, Channel::Norm.index()]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cutoff_above_nyquist_fails_extraction() {
        let config = PipelineConfig {
            filter_cutoff_hz: Some(30.0),
            ..PipelineConfig::default()
        };
        let result = extract_session(&input(held(500, 0, 0.0), held(500, 0, 0.0)), &config);
        assert!(matches!(result, Err(ActimetryError::InvalidCutoff { .. })));
    }

    #[test]
    fn test_disjoint_recordings_do_not_align() {
        let config = PipelineConfig {
            filter_cutoff_hz: None,
            ..PipelineConfig::default()
        };
        let result = extract_session(
            &input(held(100, 0, 0.0), held(100, 10_000_000, 0.0)),
            &config,
        );
        assert!(matches!(result, Err(ActimetryError::AlignmentEmpty)));
    }

    #[test]
    fn test_run_session_reports_session_id() {
        let err = run_session(&input(Vec::new(), held(100, 0, 0.0)), &PipelineConfig::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("session P01:"));
    }

    #[test]
    fn test_still_arms_have_no_functional_use() {
        let metrics = run_session(
            &input(held(3000, 0, 0.0), held(3000, 0, 0.0)),
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(metrics.window_size, 250);
        assert_eq!(metrics.num_epochs, 12);
        assert_eq!(metrics.functional_epochs, [0, 0]);
        assert_eq!(metrics.use_hours, [0.0, 0.0]);
        assert_eq!(metrics.daily_counts, vec![[0, 0]]);
        assert!(metrics.total_use_ratio.is_nan());
        assert_eq!(metrics.jerk_ratio.retained, 2998);
    }

    #[test]
    fn test_jerk_summary() {
        let summary = JerkSummary::from_ratios(&Array1::from(vec![0.5, f64::NAN, 1.5, 1.0, 2.0]));
        assert_eq!(summary.retained, 5);
        assert!((summary.mean.unwrap() - 1.25).abs() < 1e-12);
        assert!((summary.median.unwrap() - 1.25).abs() < 1e-12);
    }
}
