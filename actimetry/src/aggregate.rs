use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::ActimetryError;

pub const SECONDS_PER_DAY: usize = 24 * 3600;
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Second of measurement at which each epoch starts, on a smoothed timeline.
///
/// Epoch starts are treated as equally spaced at the mean observed spacing:
/// the k-th epoch (0-based) starts at `floor((k + 1) * spacing)`, the running
/// sum of that spacing. `fallback_spacing_s` is used when there is a single epoch.
pub fn smoothed_start_seconds(starts_us: ArrayView1<'_, i64>, fallback_spacing_s: f64) -> Vec<usize> {
    let n = starts_us.len();
    let spacing = if n >= 2 {
        (starts_us[n - 1] - starts_us[0]) as f64 / (n - 1) as f64 / 1e6
    } else {
        fallback_spacing_s
    };
    let mut elapsed = 0.0_f64;
    (0..n)
        .map(|_| {
            elapsed += spacing;
            elapsed.floor().max(0.0) as usize
        })
        .collect()
}

fn check_shapes(flags: &Array2<bool>, start_seconds: &[usize]) -> Result<(), ActimetryError> {
    let epochs = flags.len_of(Axis(0));
    if epochs != start_seconds.len() {
        return Err(ActimetryError::InvalidParameter(format!(
            "{epochs} epoch flags but {} epoch start times",
            start_seconds.len()
        )));
    }
    Ok(())
}

/// Scatter-add functional flags into a dense `(bucket, arm)` buffer.
fn scatter_counts(flags: &Array2<bool>, buckets: &[usize]) -> Array2<usize> {
    let arms = flags.len_of(Axis(1));
    let rows = buckets.iter().max().map_or(0, |&last| last + 1);
    let mut counts = Array2::zeros((rows, arms));
    for (row, &bucket) in flags.outer_iter().zip(buckets) {
        let mut target = counts.row_mut(bucket);
        for (cell, &flag) in target.iter_mut().zip(row.iter()) {
            *cell += usize::from(flag);
        }
    }
    counts
}

/// Functional epochs per day and arm, shaped `(num_days, num_arms)`.
///
/// Days run from 0 to the last observed day; a day without functional epochs
/// is present with a count of 0.
pub fn functional_count_per_day(
    flags: &Array2<bool>,
    start_seconds: &[usize],
) -> Result<Array2<usize>, ActimetryError> {
    check_shapes(flags, start_seconds)?;
    let days: Vec<usize> = start_seconds.iter().map(|s| s / SECONDS_PER_DAY).collect();
    Ok(scatter_counts(flags, &days))
}

/// Hours of use per arm.
///
/// Each functional epoch counts toward the single second in which it starts.
/// A second is active when its count exceeds `activity_threshold`.
pub fn use_hours(
    flags: &Array2<bool>,
    start_seconds: &[usize],
    activity_threshold: f64,
) -> Result<Array1<f64>, ActimetryError> {
    check_shapes(flags, start_seconds)?;
    let per_second = scatter_counts(flags, start_seconds);
    let arms = flags.len_of(Axis(1));
    let mut hours = Array1::zeros(arms);
    for (arm, column) in per_second.axis_iter(Axis(1)).enumerate() {
        let active = column
            .iter()
            .filter(|&&count| count as f64 > activity_threshold)
            .count();
        hours[arm] = active as f64 / SECONDS_PER_HOUR;
    }
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_smoothed_seconds_start_after_one_spacing() {
        let starts: Array1<i64> = Array1::from(vec![0, 5_000_000, 10_000_000, 15_000_000]);
        assert_eq!(smoothed_start_seconds(starts.view(), 5.0), vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_smoothed_seconds_absorb_jitter() {
        // Literal starts jitter; the smoothed timeline uses the mean spacing of 5 s.
        let starts: Array1<i64> = Array1::from(vec![0, 5_400_000, 9_700_000, 15_000_000]);
        assert_eq!(smoothed_start_seconds(starts.view(), 5.0), vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_single_epoch_uses_fallback_spacing() {
        let starts: Array1<i64> = Array1::from(vec![123]);
        assert_eq!(smoothed_start_seconds(starts.view(), 5.0), vec![5]);
    }

    #[test]
    fn test_daily_counts_are_dense() {
        let flags = array![[true, false], [true, true], [false, false], [true, false]];
        // Day 0, day 0, day 1, day 3 (day 2 has no epoch at all).
        let seconds = vec![10, 80_000, 90_000, 3 * SECONDS_PER_DAY + 5];
        let counts = functional_count_per_day(&flags, &seconds).unwrap();
        assert_eq!(counts, array![[2usize, 1], [0, 0], [0, 0], [1, 0]]);
    }

    #[test]
    fn test_daily_totals_match_flag_totals() {
        let flags = array![[true, false], [false, true], [true, true], [true, false]];
        let seconds = vec![40_000, 80_000, 120_000, 160_000];
        let counts = functional_count_per_day(&flags, &seconds).unwrap();
        for arm in 0..2 {
            let total: usize = counts.column(arm).sum();
            let expected = flags.column(arm).iter().filter(|&&f| f).count();
            assert_eq!(total, expected);
        }
    }

    #[test]
    fn test_use_hours_counts_start_seconds_only() {
        let flags = array![[true, true], [true, false], [false, false]];
        let seconds = vec![5, 10, 15];
        let hours = use_hours(&flags, &seconds, 0.0).unwrap();
        assert!((hours[0] - 2.0 / 3600.0).abs() < 1e-15);
        assert!((hours[1] - 1.0 / 3600.0).abs() < 1e-15);
    }

    #[test]
    fn test_use_hours_threshold() {
        // Two functional epochs collapse onto second 5 for arm 0.
        let flags = array![[true], [true], [true]];
        let seconds = vec![5, 5, 6];
        let hours = use_hours(&flags, &seconds, 1.0).unwrap();
        assert!((hours[0] - 1.0 / 3600.0).abs() < 1e-15);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let flags = array![[true], [false]];
        assert!(functional_count_per_day(&flags, &[1]).is_err());
    }

    #[test]
    fn test_no_epochs_gives_empty_outputs() {
        let flags = Array2::<bool>::from_elem((0, 2), false);
        let counts = functional_count_per_day(&flags, &[]).unwrap();
        assert_eq!(counts.dim(), (0, 2));
        let hours = use_hours(&flags, &[], 0.0).unwrap();
        assert_eq!(hours.to_vec(), vec![0.0, 0.0]);
    }
}
