use ndarray::{Array1, Array2, Array3, Array4, Axis};

use crate::{ActimetryError, Arm, Channel};

/// Symmetric use ratio `2 p / (p + np)`: 1 is symmetric use, 0 no paretic use,
/// 2 only paretic use. NaN when both inputs are zero.
pub fn ratio(non_paretic: f64, paretic: f64) -> f64 {
    2.0 * paretic / (paretic + non_paretic)
}

fn require_two_arms(arms: usize) -> Result<(), ActimetryError> {
    if arms != 2 {
        return Err(ActimetryError::InvalidParameter(format!(
            "ratios need exactly 2 arms, got {arms}"
        )));
    }
    Ok(())
}

/// Use ratio for every day row of a `(day, arm)` count table.
pub fn daily_use_ratio(daily_counts: &Array2<usize>) -> Result<Array1<f64>, ActimetryError> {
    require_two_arms(daily_counts.len_of(Axis(1)))?;
    Ok(daily_counts
        .outer_iter()
        .map(|day| {
            ratio(
                day[Arm::NonParetic.index()] as f64,
                day[Arm::Paretic.index()] as f64,
            )
        })
        .collect())
}

/// Use ratio over the whole recording, from `(epoch, arm)` functional flags.
pub fn total_use_ratio(flags: &Array2<bool>) -> Result<f64, ActimetryError> {
    require_two_arms(flags.len_of(Axis(1)))?;
    let count = |arm: Arm| flags.column(arm.index()).iter().filter(|&&f| f).count() as f64;
    Ok(ratio(count(Arm::NonParetic), count(Arm::Paretic)))
}

/// Paired ratio of magnitudes, dropping every index where either arm falls
/// below `removal_threshold` from both sides.
fn paired_ratio(non_paretic: &[f64], paretic: &[f64], removal_threshold: f64) -> Array1<f64> {
    non_paretic
        .iter()
        .zip(paretic)
        .filter(|&(&np, &p)| !(p < removal_threshold || np < removal_threshold))
        .map(|(&np, &p)| ratio(np, p))
        .collect()
}

/// Jerk ratio per sample of a `(time, arm, channel)` jerk tensor, from |jerk norm|.
pub fn jerk_ratio(jerk: &Array3<f64>, removal_threshold: f64) -> Result<Array1<f64>, ActimetryError> {
    require_two_arms(jerk.len_of(Axis(1)))?;
    let norms = jerk.index_axis(Axis(2), Channel::Norm.index());
    let magnitude = |arm: Arm| -> Vec<f64> {
        norms.column(arm.index()).iter().map(|v| v.abs()).collect()
    };
    Ok(paired_ratio(
        &magnitude(Arm::NonParetic),
        &magnitude(Arm::Paretic),
        removal_threshold,
    ))
}

/// Mean |jerk norm| per epoch and arm from a partitioned jerk tensor
/// `(epoch, sample, arm, channel)`.
pub fn epoch_jerk_magnitude(windowed_jerk: &Array4<f64>) -> Array2<f64> {
    let (num_epochs, window, arms, _) = windowed_jerk.dim();
    let mut out = Array2::zeros((num_epochs, arms));
    if window == 0 {
        return out;
    }
    for (epoch, samples) in windowed_jerk.outer_iter().enumerate() {
        let norms = samples.index_axis(Axis(2), Channel::Norm.index());
        for arm in 0..arms {
            let total: f64 = norms.column(arm).iter().map(|v| v.abs()).sum();
            out[[epoch, arm]] = total / window as f64;
        }
    }
    out
}

/// Jerk ratio per epoch, with the same paired removal as [`jerk_ratio`].
pub fn epoch_jerk_ratio(
    epoch_magnitude: &Array2<f64>,
    removal_threshold: f64,
) -> Result<Array1<f64>, ActimetryError> {
    require_two_arms(epoch_magnitude.len_of(Axis(1)))?;
    let column = |arm: Arm| epoch_magnitude.column(arm.index()).to_vec();
    Ok(paired_ratio(
        &column(Arm::NonParetic),
        &column(Arm::Paretic),
        removal_threshold,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NUM_CHANNELS;
    use ndarray::array;

    #[test]
    fn test_equal_use_is_one() {
        for x in [0.5, 1.0, 17.0, 1e6] {
            assert!((ratio(x, x) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_scale_invariance() {
        let base = ratio(3.0, 1.0);
        for k in [0.1, 2.0, 1000.0] {
            assert!((ratio(3.0 * k, 1.0 * k) - base).abs() < 1e-12);
        }
        assert!((base - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(ratio(4.0, 0.0), 0.0);
        assert_eq!(ratio(0.0, 4.0), 2.0);
        assert!(ratio(0.0, 0.0).is_nan());
    }

    #[test]
    fn test_daily_and_total_use_ratio() {
        let counts = array![[10usize, 10], [30, 10], [0, 0]];
        let daily = daily_use_ratio(&counts).unwrap();
        assert!((daily[0] - 1.0).abs() < 1e-12);
        assert!((daily[1] - 0.5).abs() < 1e-12);
        assert!(daily[2].is_nan());

        let flags = array![[true, true], [true, false], [true, false], [false, false]];
        assert!((total_use_ratio(&flags).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_jerk_ratio_paired_removal() {
        let mut jerk = Array3::<f64>::zeros((4, 2, NUM_CHANNELS));
        let non_paretic = [2.0, 0.1, 4.0, 1.0];
        let paretic = [-2.0, 3.0, 0.05, 3.0];
        for i in 0..4 {
            jerk[[i, 0, 3]] = non_paretic[i];
            jerk[[i, 1, 3]] = paretic[i];
        }
        let all = jerk_ratio(&jerk, 0.0).unwrap();
        assert_eq!(all.len(), 4);
        assert!((all[0] - 1.0).abs() < 1e-12);

        // Indices 1 and 2 drop on one side each, so both arrays lose them.
        let kept = jerk_ratio(&jerk, 0.5).unwrap();
        assert_eq!(kept.len(), 2);
        assert!((kept[0] - 1.0).abs() < 1e-12);
        assert!((kept[1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_epoch_jerk_magnitude_and_ratio() {
        let mut windowed = Array4::<f64>::zeros((2, 2, 2, NUM_CHANNELS));
        windowed[[0, 0, 0, 3]] = 1.0;
        windowed[[0, 1, 0, 3]] = 3.0;
        windowed[[0, 0, 1, 3]] = -2.0;
        windowed[[0, 1, 1, 3]] = 2.0;
        let magnitude = epoch_jerk_magnitude(&windowed);
        assert_eq!(magnitude, array![[2.0, 2.0], [0.0, 0.0]]);

        let ratios = epoch_jerk_ratio(&magnitude, 0.5).unwrap();
        assert_eq!(ratios.len(), 1);
        assert!((ratios[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_arm_rejected() {
        let counts = Array2::<usize>::zeros((1, 1));
        assert!(daily_use_ratio(&counts).is_err());
    }
}
