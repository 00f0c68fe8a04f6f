use ndarray::{s, Array1, Array3, Axis};

use crate::{ActimetryError, NUM_CHANNELS};

pub fn euclidean_norm(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// Jerk per arm with channels `(jx, jy, jz, |j|)`, one sample shorter at each end
/// than the acceleration it was derived from.
#[derive(Clone, Debug)]
pub struct JerkTensor {
    pub data: Array3<f64>,
    pub times: Array1<i64>,
}

impl JerkTensor {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Central-difference jerk `(a(t+1) - a(t-1)) / (2 dt)`.
///
/// `dt` is a single scalar for the whole series: the mean of the two-sample-wide
/// time differences `t[i+2] - t[i]`, in seconds.
pub fn compute_jerk(
    acceleration: &Array3<f64>,
    times: &Array1<i64>,
) -> Result<JerkTensor, ActimetryError> {
    let n = acceleration.len_of(Axis(0));
    if n < 3 || times.len() != n {
        return Err(ActimetryError::InsufficientData(format!(
            "jerk needs at least 3 aligned samples, got {n} samples and {} timestamps",
            times.len()
        )));
    }
    // Mean of t[i+2] - t[i] telescopes to the end points.
    let span_us = (times[n - 1] + times[n - 2] - times[1] - times[0]) as f64;
    let delta_t = span_us / (n - 2) as f64 / 1e6;
    if delta_t <= 0.0 {
        return Err(ActimetryError::InvalidParameter(
            "time index must be increasing to compute jerk".into(),
        ));
    }

    let arms = acceleration.len_of(Axis(1));
    let ahead = acceleration.slice(s![2.., .., 0..3]);
    let behind = acceleration.slice(s![..n - 2, .., 0..3]);
    let mut data = Array3::zeros((n - 2, arms, NUM_CHANNELS));
    data.slice_mut(s![.., .., 0..3])
        .assign(&((&ahead - &behind) / (2.0 * delta_t)));
    for mut sample in data.outer_iter_mut() {
        for mut arm in sample.outer_iter_mut() {
            arm[3] = euclidean_norm(arm[0], arm[1], arm[2]);
        }
    }

    Ok(JerkTensor {
        data,
        times: times.slice(s![1..n - 1]).to_owned(),
    })
}
