use std::f64::consts::FRAC_PI_2;

use ndarray::{Array2, Array3, ArrayView1, Axis, Zip};

use crate::window::Epochs;
use crate::Channel;

/// Forearm elevation from horizontal, `arccos(a_y / |a|) - pi/2`, in `[-pi/2, pi/2]`.
///
/// Zero when the forearm axis is horizontal. NaN when the norm is zero or the
/// inputs are not finite.
pub fn elevation_angle(a_y: f64, norm: f64) -> f64 {
    if !(norm > 0.0) || !a_y.is_finite() || !norm.is_finite() {
        return f64::NAN;
    }
    (a_y / norm).clamp(-1.0, 1.0).acos() - FRAC_PI_2
}

/// Per-sample elevation angles shaped `(epoch, sample, arm)`.
pub fn elevation_angles(epochs: &Epochs) -> Array3<f64> {
    let a_y = epochs.data.index_axis(Axis(3), Channel::Y.index());
    let norm = epochs.data.index_axis(Axis(3), Channel::Norm.index());
    Zip::from(&a_y).and(&norm).map_collect(|&y, &n| elevation_angle(y, n))
}

/// Whether one epoch of angles (radians) counts as functional arm use.
///
/// Every angle must lie within `symmetry_rad` of horizontal and the epoch
/// must sweep at least `amplitude_rad`. An epoch holding any NaN is not
/// functional; an empty epoch is not functional either.
pub fn is_functional_epoch(angles: ArrayView1<'_, f64>, symmetry_rad: f64, amplitude_rad: f64) -> bool {
    if angles.is_empty() || angles.iter().any(|a| a.is_nan()) {
        return false;
    }
    let within_symmetry = angles.iter().all(|a| a.abs() <= symmetry_rad);
    let (lo, hi) = angles
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &a| (lo.min(a), hi.max(a)));
    within_symmetry && hi - lo >= amplitude_rad
}

/// Functional flags shaped `(epoch, arm)` from angles shaped `(epoch, sample, arm)`.
pub fn classify_functional(angles: &Array3<f64>, symmetry_rad: f64, amplitude_rad: f64) -> Array2<bool> {
    let (num_epochs, _, arms) = angles.dim();
    let mut flags = Array2::from_elem((num_epochs, arms), false);
    for (epoch, window) in angles.outer_iter().enumerate() {
        for arm in 0..arms {
            flags[[epoch, arm]] =
                is_functional_epoch(window.column(arm), symmetry_rad, amplitude_rad);
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4};

    fn deg(values: &[f64]) -> Array1<f64> {
        values.iter().map(|v| v.to_radians()).collect()
    }

    fn thirty() -> f64 {
        30.0_f64.to_radians()
    }

    #[test]
    fn test_horizontal_forearm_is_zero() {
        assert!(elevation_angle(0.0, 9.81).abs() < 1e-12);
    }

    #[test]
    fn test_vertical_forearm_is_quarter_turn() {
        assert!((elevation_angle(9.81, 9.81) + FRAC_PI_2).abs() < 1e-12);
        assert!((elevation_angle(-9.81, 9.81) - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_zero_norm_is_nan() {
        assert!(elevation_angle(0.0, 0.0).is_nan());
    }

    #[test]
    fn test_rounding_above_one_is_clamped() {
        let y = 1.0 + 1e-15;
        assert!((elevation_angle(y, 1.0) + FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_flat_epoch_is_not_functional() {
        let angles = deg(&[0.0; 10]);
        assert!(!is_functional_epoch(angles.view(), thirty(), thirty()));
    }

    #[test]
    fn test_swing_within_region_is_functional() {
        let angles = deg(&[-20.0, 0.0, 25.0, 10.0, -5.0]);
        assert!(is_functional_epoch(angles.view(), thirty(), thirty()));
    }

    #[test]
    fn test_single_excursion_breaks_symmetry() {
        let angles = deg(&[-20.0, 0.0, 35.0, 10.0]);
        assert!(!is_functional_epoch(angles.view(), thirty(), thirty()));
    }

    #[test]
    fn test_nan_epoch_is_not_functional() {
        let mut angles = deg(&[-20.0, 25.0, 0.0]);
        angles[2] = f64::NAN;
        assert!(!is_functional_epoch(angles.view(), thirty(), thirty()));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let angles = deg(&[-20.0, 25.0]);
        assert!(!is_functional_epoch(
            angles.view(),
            thirty(),
            50.0_f64.to_radians()
        ));
        assert!(!is_functional_epoch(
            angles.view(),
            20.0_f64.to_radians(),
            thirty()
        ));
    }

    #[test]
    fn test_angles_and_flags_from_epochs() {
        // Two epochs of 3 samples; arm 1 swings in epoch 0 only.
        let mut data = Array4::<f64>::zeros((2, 3, 2, 4));
        for epoch in 0..2 {
            for sample in 0..3 {
                for arm in 0..2 {
                    let alpha: f64 = if arm == 1 && epoch == 0 {
                        [-20.0_f64, 0.0, 25.0][sample].to_radians()
                    } else {
                        0.0
                    };
                    data[[epoch, sample, arm, 0]] = alpha.cos();
                    data[[epoch, sample, arm, 1]] = -alpha.sin();
                    data[[epoch, sample, arm, 3]] = 1.0;
                }
            }
        }
        let epochs = Epochs {
            data,
            times: Array2::zeros((2, 3)),
            window_size: 3,
            delta_t_s: 1.0,
        };
        let angles = elevation_angles(&epochs);
        assert_eq!(angles.dim(), (2, 3, 2));
        assert!((angles[[0, 2, 1]] - 25.0_f64.to_radians()).abs() < 1e-9);

        let flags = classify_functional(&angles, thirty(), thirty());
        assert_eq!(flags.dim(), (2, 2));
        assert!(flags[[0, 1]]);
        assert!(!flags[[0, 0]]);
        assert!(!flags[[1, 1]]);
    }
}
