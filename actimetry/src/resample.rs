use ndarray::{s, Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::signal::euclidean_norm;
use crate::{ActimetryError, NUM_CHANNELS};

/// One raw reading of a wrist sensor; `t_us` is microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawSample {
    pub t_us: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RawSample {
    pub fn new(t_us: i64, x: f64, y: f64, z: f64) -> Self {
        Self { t_us, x, y, z }
    }
}

/// Time-indexed `(x, y, z, norm)` samples for one arm.
#[derive(Clone, Debug)]
pub struct UniformSeries {
    pub times: Array1<i64>,
    pub channels: Array2<f64>,
}

impl UniformSeries {
    pub fn empty() -> Self {
        Self {
            times: Array1::zeros(0),
            channels: Array2::zeros((0, NUM_CHANNELS)),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first_time(&self) -> Option<i64> {
        self.times.first().copied()
    }

    /// Rebuild the norm column from the current x, y, z columns.
    pub fn recompute_norm(&mut self) {
        for mut row in self.channels.outer_iter_mut() {
            row[3] = euclidean_norm(row[0], row[1], row[2]);
        }
    }

    /// At most `len` samples, starting from the first one at or after `start_us`.
    fn slice_from(&self, start_us: i64, len: usize) -> Self {
        let offset = self
            .times
            .iter()
            .position(|&t| t >= start_us)
            .unwrap_or(self.len());
        let end = (offset + len).min(self.len());
        Self {
            times: self.times.slice(s![offset..end]).to_owned(),
            channels: self.channels.slice(s![offset..end, ..]).to_owned(),
        }
    }

    fn count_from(&self, start_us: i64) -> usize {
        self.times.iter().filter(|&&t| t >= start_us).count()
    }
}

/// Grid spacing for a target frequency, truncated to whole milliseconds.
pub(crate) fn grid_step_us(freq_hz: f64) -> Result<i64, ActimetryError> {
    if !(freq_hz.is_finite() && freq_hz > 0.0) {
        return Err(ActimetryError::Configuration(format!(
            "resampling frequency must be positive, got {freq_hz}"
        )));
    }
    let step_ms = (1000.0 / freq_hz).trunc() as i64;
    if step_ms <= 0 {
        return Err(ActimetryError::Configuration(format!(
            "resampling frequency {freq_hz} Hz is finer than the 1 ms grid"
        )));
    }
    Ok(step_ms * 1000)
}

const DAY_US: i64 = 86_400_000_000;

/// Grid points allowed per raw sample before a stream counts as too sparse to resample.
const MAX_GRID_PER_SAMPLE: usize = 64;

/// Put one arm's raw stream on a uniform grid.
///
/// With `freq_hz = Some(f)` samples are bucketed on a grid of `trunc(1000/f)` ms
/// anchored at midnight (UTC) of the first sample's day, each bucket holds the
/// mean of its samples, and empty buckets are filled by linear interpolation
/// between their filled neighbours. With `None` the stream keeps its native
/// timestamps, ordered in time. The norm column is computed from the resulting axes.
///
/// A grid holding more than 64 points per raw sample fails with `SparseTimeline`
/// before anything is allocated; a single stray timestamp is enough to cause it.
pub fn resample(samples: &[RawSample], freq_hz: Option<f64>) -> Result<UniformSeries, ActimetryError> {
    let mut ordered = samples.to_vec();
    ordered.sort_by_key(|s| s.t_us);

    let mut series = match freq_hz {
        Some(freq) => bucket_mean(&ordered, grid_step_us(freq)?)?,
        None => {
            let mut channels = Array2::zeros((ordered.len(), NUM_CHANNELS));
            for (mut row, sample) in channels.outer_iter_mut().zip(ordered.iter()) {
                row[0] = sample.x;
                row[1] = sample.y;
                row[2] = sample.z;
            }
            UniformSeries {
                times: ordered.iter().map(|s| s.t_us).collect(),
                channels,
            }
        }
    };
    series.recompute_norm();
    Ok(series)
}

fn bucket_mean(ordered: &[RawSample], step_us: i64) -> Result<UniformSeries, ActimetryError> {
    let (first, last) = match (ordered.first(), ordered.last()) {
        (Some(first), Some(last)) => (first.t_us, last.t_us),
        _ => return Ok(UniformSeries::empty()),
    };
    let sparse = || ActimetryError::SparseTimeline {
        samples: ordered.len(),
        span_s: (last as f64 - first as f64) / 1e6,
        step_ms: step_us / 1000,
    };
    let origin = first
        .div_euclid(DAY_US)
        .checked_mul(DAY_US)
        .ok_or_else(sparse)?;
    let first_idx = (first - origin) / step_us;
    let last_idx = last.checked_sub(origin).ok_or_else(sparse)? / step_us;
    let limit = ordered.len().saturating_mul(MAX_GRID_PER_SAMPLE);
    let len = usize::try_from(last_idx - first_idx)
        .ok()
        .and_then(|span| span.checked_add(1))
        .filter(|&len| len <= limit)
        .ok_or_else(sparse)?;

    let mut sums = vec![[0.0_f64; 3]; len];
    let mut counts = vec![0usize; len];
    for sample in ordered {
        let idx = ((sample.t_us - origin) / step_us - first_idx) as usize;
        sums[idx][0] += sample.x;
        sums[idx][1] += sample.y;
        sums[idx][2] += sample.z;
        counts[idx] += 1;
    }

    let mut channels = Array2::zeros((len, NUM_CHANNELS));
    let mut prev_filled: Option<usize> = None;
    for idx in 0..len {
        if counts[idx] == 0 {
            continue;
        }
        let n = counts[idx] as f64;
        for axis in 0..3 {
            channels[[idx, axis]] = sums[idx][axis] / n;
        }
        if let Some(prev) = prev_filled {
            let gap = idx - prev;
            for missing in (prev + 1)..idx {
                let frac = (missing - prev) as f64 / gap as f64;
                for axis in 0..3 {
                    let a = channels[[prev, axis]];
                    let b = channels[[idx, axis]];
                    channels[[missing, axis]] = a + (b - a) * frac;
                }
            }
        }
        prev_filled = Some(idx);
    }

    let times = (0..len as i64)
        .map(|k| origin + (first_idx + k) * step_us)
        .collect();
    Ok(UniformSeries { times, channels })
}

/// Non-paretic and paretic series sharing one time index.
#[derive(Clone, Debug)]
pub struct AlignedPair {
    pub non_paretic: UniformSeries,
    pub paretic: UniformSeries,
}

impl AlignedPair {
    pub fn len(&self) -> usize {
        self.paretic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time index of the pair; the paretic stream's timestamps are authoritative.
    pub fn times(&self) -> &Array1<i64> {
        &self.paretic.times
    }

    /// Stack both arms into a `(time, arm, channel)` tensor.
    pub fn to_tensor(&self) -> Array3<f64> {
        let views = [self.non_paretic.channels.view(), self.paretic.channels.view()];
        match ndarray::stack(Axis(1), &views) {
            Ok(tensor) => tensor,
            Err(_) => Array3::zeros((0, views.len(), NUM_CHANNELS)),
        }
    }
}

/// Trim both arms to the later of the two start times and the shorter length.
///
/// An empty result is returned as is; callers decide whether that is fatal.
pub fn align(non_paretic: &UniformSeries, paretic: &UniformSeries) -> AlignedPair {
    let start = match (non_paretic.first_time(), paretic.first_time()) {
        (Some(a), Some(b)) => a.max(b),
        _ => {
            return AlignedPair {
                non_paretic: UniformSeries::empty(),
                paretic: UniformSeries::empty(),
            }
        }
    };
    let length = non_paretic.count_from(start).min(paretic.count_from(start));
    AlignedPair {
        non_paretic: non_paretic.slice_from(start, length),
        paretic: paretic.slice_from(start, length),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1000;

    fn sample(t_ms: i64, v: f64) -> RawSample {
        RawSample::new(t_ms * MS, v, 0.0, 0.0)
    }

    #[test]
    fn test_bucket_mean_and_gap_interpolation() {
        // 50 Hz grid: buckets of 20 ms; the 40 ms bucket is missing.
        let samples = vec![sample(0, 1.0), sample(10, 3.0), sample(20, 4.0), sample(60, 10.0)];
        let series = resample(&samples, Some(50.0)).unwrap();
        assert_eq!(series.times.to_vec(), vec![0, 20 * MS, 40 * MS, 60 * MS]);
        let x: Vec<f64> = series.channels.column(0).to_vec();
        assert_eq!(x, vec![2.0, 4.0, 7.0, 10.0]);
    }

    #[test]
    fn test_grid_is_anchored_at_midnight() {
        let samples = vec![sample(1_005, 1.0), sample(1_031, 1.0)];
        let series = resample(&samples, Some(50.0)).unwrap();
        assert_eq!(series.times.to_vec(), vec![1_000 * MS, 1_020 * MS]);
    }

    #[test]
    fn test_grid_step_not_dividing_a_day() {
        // 30 Hz => 33 ms buckets counted from 2024-03-01T00:00:00Z.
        let midnight_ms = 1_709_251_200_000;
        let samples = vec![
            sample(midnight_ms, 1.0),
            sample(midnight_ms + 40, 3.0),
            sample(midnight_ms + 70, 5.0),
        ];
        let series = resample(&samples, Some(30.0)).unwrap();
        let offsets: Vec<i64> = series.times.iter().map(|t| t - midnight_ms * MS).collect();
        assert_eq!(offsets, vec![0, 33 * MS, 66 * MS]);
        assert_eq!(series.channels.column(0).to_vec(), vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_stray_timestamp_is_rejected_without_allocating() {
        let midnight_ms = 1_709_251_200_000;
        let samples = vec![
            sample(0, 1.0),
            sample(midnight_ms, 1.0),
            sample(midnight_ms + 20, 1.0),
        ];
        assert!(matches!(
            resample(&samples, Some(50.0)),
            Err(ActimetryError::SparseTimeline { samples: 3, .. })
        ));
        assert!(resample(&samples, None).is_ok());
    }

    #[test]
    fn test_resample_computes_norm() {
        let samples = vec![RawSample::new(0, 3.0, 4.0, 0.0)];
        let series = resample(&samples, Some(50.0)).unwrap();
        assert!((series.channels[[0, 3]] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_unordered_input_without_resampling() {
        let samples = vec![sample(30, 2.0), sample(5, 1.0)];
        let series = resample(&samples, None).unwrap();
        assert_eq!(series.times.to_vec(), vec![5 * MS, 30 * MS]);
        assert_eq!(series.channels[[0, 0]], 1.0);
    }

    #[test]
    fn test_non_positive_frequency_rejected() {
        let samples = vec![sample(0, 1.0)];
        assert!(matches!(
            resample(&samples, Some(-5.0)),
            Err(ActimetryError::Configuration(_))
        ));
        assert!(matches!(
            resample(&samples, Some(2000.0)),
            Err(ActimetryError::Configuration(_))
        ));
    }

    #[test]
    fn test_align_common_start_and_length() {
        let a: Vec<RawSample> = (0..10).map(|i| sample(i * 20, i as f64)).collect();
        let b: Vec<RawSample> = (3..20).map(|i| sample(i * 20, i as f64)).collect();
        let a = resample(&a, Some(50.0)).unwrap();
        let b = resample(&b, Some(50.0)).unwrap();
        let pair = align(&a, &b);
        assert_eq!(pair.len(), 7);
        assert_eq!(pair.non_paretic.len(), pair.paretic.len());
        assert_eq!(pair.non_paretic.times, pair.paretic.times);
        assert_eq!(pair.times()[0], 60 * MS);
        assert_eq!(pair.non_paretic.channels[[0, 0]], 3.0);

        let tensor = pair.to_tensor();
        assert_eq!(tensor.dim(), (7, 2, NUM_CHANNELS));
        assert_eq!(tensor[[6, 1, 0]], 9.0);
    }

    #[test]
    fn test_align_disjoint_streams_is_empty() {
        let a = resample(&[sample(0, 1.0)], Some(50.0)).unwrap();
        let b = resample(&[sample(1_000, 1.0)], Some(50.0)).unwrap();
        assert!(align(&a, &b).is_empty());
        assert!(align(&UniformSeries::empty(), &b).is_empty());
    }
}
