use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, Axis};

use crate::aggregate::smoothed_start_seconds;
use crate::filter::mean_interval_us;
use crate::ActimetryError;

/// Non-overlapping epochs: data `(epoch, sample, arm, channel)` and times `(epoch, sample)`.
#[derive(Clone, Debug)]
pub struct Epochs {
    pub data: Array4<f64>,
    pub times: Array2<i64>,
    pub window_size: usize,
    pub delta_t_s: f64,
}

impl Epochs {
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First timestamp of every epoch.
    pub fn starts(&self) -> ArrayView1<'_, i64> {
        self.times.column(0)
    }

    /// Nominal epoch duration, `window_size * dt`.
    pub fn duration_s(&self) -> f64 {
        self.window_size as f64 * self.delta_t_s
    }

    /// Epoch starts on the smoothed per-second timeline used for aggregation.
    pub fn start_seconds(&self) -> Vec<usize> {
        if self.is_empty() {
            return Vec::new();
        }
        smoothed_start_seconds(self.starts(), self.duration_s())
    }
}

/// Cut a `(time, arm, channel)` tensor into epochs of `seconds_per_window`.
///
/// `window_size = floor(seconds_per_window / dt)` with `dt` the mean timestamp
/// spacing. Trailing samples that do not fill a whole epoch are dropped.
pub fn partition(
    tensor: &Array3<f64>,
    times: &Array1<i64>,
    seconds_per_window: f64,
) -> Result<Epochs, ActimetryError> {
    let total = tensor.len_of(Axis(0));
    if times.len() != total {
        return Err(ActimetryError::InvalidParameter(format!(
            "tensor has {total} samples but time index has {}",
            times.len()
        )));
    }
    let delta_us = mean_interval_us(times)?;
    let delta_t_s = delta_us / 1e6;
    let window = (seconds_per_window * 1e6 / delta_us).floor();
    if !(window >= 1.0) {
        return Err(ActimetryError::DegenerateWindow {
            seconds_per_window,
            delta_t_s,
        });
    }
    let window_size = window as usize;
    let num_windows = total / window_size;
    let kept = num_windows * window_size;
    let (_, arms, channels) = tensor.dim();

    let data = Array4::from_shape_vec(
        (num_windows, window_size, arms, channels),
        tensor.slice(s![..kept, .., ..]).iter().copied().collect(),
    )
    .map_err(|e| ActimetryError::InvalidParameter(e.to_string()))?;
    let times = Array2::from_shape_vec(
        (num_windows, window_size),
        times.slice(s![..kept]).to_vec(),
    )
    .map_err(|e| ActimetryError::InvalidParameter(e.to_string()))?;

    Ok(Epochs {
        data,
        times,
        window_size,
        delta_t_s,
    })
}
