use ndarray::Array1;
use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos,
};
use sci_rs::signal::filter::sosfiltfilt_dyn;

use crate::ActimetryError;

pub const FILTER_ORDER: usize = 4;

/// Mean spacing of consecutive timestamps, in seconds.
pub fn mean_sampling_interval(times: &Array1<i64>) -> Result<f64, ActimetryError> {
    Ok(mean_interval_us(times)? / 1e6)
}

pub(crate) fn mean_interval_us(times: &Array1<i64>) -> Result<f64, ActimetryError> {
    let n = times.len();
    if n < 2 {
        return Err(ActimetryError::InsufficientData(format!(
            "sampling interval needs at least 2 samples, got {n}"
        )));
    }
    // The mean of consecutive differences telescopes to the end points.
    let delta_us = (times[n - 1] - times[0]) as f64 / (n - 1) as f64;
    if delta_us <= 0.0 {
        return Err(ActimetryError::InvalidParameter(
            "time index must be increasing".into(),
        ));
    }
    Ok(delta_us)
}

/// Digital low-pass Butterworth filter stored as second-order sections.
pub struct Butterworth {
    sections: Vec<Sos<f64>>,
}

impl Butterworth {
    /// Design a low-pass for samples spaced `delta_t` seconds apart.
    ///
    /// Fails with `InvalidCutoff` unless `0 < cutoff_hz < 0.5 / delta_t`.
    pub fn lowpass(order: usize, cutoff_hz: f64, delta_t: f64) -> Result<Self, ActimetryError> {
        if order == 0 {
            return Err(ActimetryError::InvalidParameter(
                "filter order must be positive".into(),
            ));
        }
        let nyquist = 0.5 / delta_t;
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0) || cutoff_hz >= nyquist {
            return Err(ActimetryError::InvalidCutoff {
                cutoff_hz,
                nyquist_hz: nyquist,
            });
        }

        let design = butter_dyn(
            order,
            vec![cutoff_hz / nyquist],
            Some(FilterBandType::Lowpass),
            Some(false),
            Some(FilterOutputType::Sos),
            None,
        );
        match design {
            DigitalFilter::Sos(filter) => Ok(Self {
                sections: filter.sos,
            }),
            _ => Err(ActimetryError::InvalidParameter(
                "Butterworth design did not return second-order sections".into(),
            )),
        }
    }

    /// Samples reflected at each end before forward-backward filtering.
    pub fn pad_len(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Zero-phase filtering: forward pass, then a backward pass over the result.
    ///
    /// Both ends are extended by odd reflection and each pass starts from the
    /// steady state of its first sample, so output sample `i` stays aligned
    /// with input sample `i`.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>, ActimetryError> {
        let n = signal.len();
        let pad = self.pad_len();
        if n <= pad {
            return Err(ActimetryError::InsufficientData(format!(
                "forward-backward filtering needs more than {pad} samples, got {n}"
            )));
        }
        Ok(sosfiltfilt_dyn(signal.iter(), &self.sections))
    }
}

/// 4th-order zero-phase low-pass of one channel.
pub fn low_pass(signal: &[f64], delta_t: f64, cutoff_hz: f64) -> Result<Vec<f64>, ActimetryError> {
    Butterworth::lowpass(FILTER_ORDER, cutoff_hz, delta_t)?.filtfilt(signal)
}
