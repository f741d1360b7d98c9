//! Latency/filter engine (C3).
//!
//! Applies static or tabulated time-latency corrections to a time series,
//! and an optional boxcar smoothing pass, selectable by channel mask.

use crate::error::SondageError;
use crate::timeseries::{Sample, TimeSeries};

/// A time-latency correction policy.
#[derive(Debug, Clone)]
pub enum LatencyModel {
    /// Add a fixed offset to every timestamp.
    Constant(f64),
    /// Add an interpolated offset looked up in a `(time, delta)` table.
    Tabulated(Vec<(f64, f64)>),
}

/// A smoothing policy applied after latency correction.
#[derive(Debug, Clone, Copy)]
pub enum FilterModel {
    None,
    /// Replace each sample with the mean of samples within `window/2`
    /// seconds on either side.
    Boxcar { window: f64 },
}

/// Channel selection bitmask for latency/filter application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMask(pub u16);

impl ChannelMask {
    pub const NAV: Self = ChannelMask(1 << 0);
    pub const DEPTH: Self = ChannelMask(1 << 1);
    pub const ALTITUDE: Self = ChannelMask(1 << 2);
    pub const HEADING: Self = ChannelMask(1 << 3);
    pub const ATTITUDE: Self = ChannelMask(1 << 4);
    pub const SOUND_SPEED: Self = ChannelMask(1 << 5);
    pub const SURVEY: Self = ChannelMask(1 << 6);
    pub const ALL: Self = ChannelMask(0x7f);

    pub fn contains(self, channel: ChannelMask) -> bool {
        self.0 & channel.0 == channel.0
    }

    pub fn union(self, other: ChannelMask) -> ChannelMask {
        ChannelMask(self.0 | other.0)
    }
}

/// Validate that a tabulated latency model's timestamps are strictly
/// monotonic, without mutating anything — callers must check this before
/// applying the model so latency application is atomic (`BadLatencyModel`
/// aborts before any mutation).
fn validate_table(table: &[(f64, f64)]) -> Result<(), SondageError> {
    for pair in table.windows(2) {
        if pair[1].0 <= pair[0].0 {
            return Err(SondageError::BadLatencyModel {
                message: format!(
                    "latency table is non-monotonic at t={} -> t={}",
                    pair[0].0, pair[1].0
                ),
            });
        }
    }
    Ok(())
}

fn interp_table(table: &[(f64, f64)], t: f64) -> f64 {
    if table.is_empty() {
        return 0.0;
    }
    if t <= table[0].0 {
        return table[0].1;
    }
    if t >= table[table.len() - 1].0 {
        return table[table.len() - 1].1;
    }
    let idx = match table.binary_search_by(|probe| probe.0.partial_cmp(&t).unwrap()) {
        Ok(i) => return table[i].1,
        Err(i) => i,
    };
    let (t0, d0) = table[idx - 1];
    let (t1, d1) = table[idx];
    let frac = (t - t0) / (t1 - t0);
    d0 + frac * (d1 - d0)
}

/// Apply a latency model to every timestamp in `series`, in place.
///
/// Validation happens before any mutation so a `BadLatencyModel` failure
/// leaves the series untouched.
pub fn apply_latency<T: Sample>(
    series: &mut TimeSeries<T>,
    model: &LatencyModel,
) -> Result<(), SondageError> {
    match model {
        LatencyModel::Constant(delta) => {
            for t in series.times_mut() {
                *t += delta;
            }
        }
        LatencyModel::Tabulated(table) => {
            validate_table(table)?;
            let deltas: Vec<f64> = series.times().iter().map(|&t| interp_table(table, t)).collect();
            for (t, delta) in series.times_mut().iter_mut().zip(deltas) {
                *t += delta;
            }
        }
    }
    Ok(())
}

/// Apply a boxcar smoothing filter to `series`, in place. A window of `0`
/// (or `FilterModel::None`) is a no-op.
pub fn apply_filter<T: Sample>(series: &mut TimeSeries<T>, model: FilterModel) {
    let window = match model {
        FilterModel::None => return,
        FilterModel::Boxcar { window } if window <= 0.0 => return,
        FilterModel::Boxcar { window } => window,
    };

    let times = series.times().to_vec();
    let half = window / 2.0;
    let mut smoothed = Vec::with_capacity(times.len());

    let mut lo = 0usize;
    let mut hi = 0usize;
    for (i, &t) in times.iter().enumerate() {
        while times[lo] < t - half {
            lo += 1;
        }
        if hi < i {
            hi = i;
        }
        while hi + 1 < times.len() && times[hi + 1] <= t + half {
            hi += 1;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for j in lo..=hi {
            sum += series.values()[j].into_f64();
            count += 1;
        }
        smoothed.push(T::from_f64(sum / count as f64));
    }

    *series.values_mut() = smoothed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::Scalar;

    #[test]
    fn constant_latency_shifts_every_timestamp() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(0.0, Scalar(1.0)).unwrap();
        ts.push(1.0, Scalar(2.0)).unwrap();
        apply_latency(&mut ts, &LatencyModel::Constant(5.0)).unwrap();
        assert_eq!(ts.times(), &[5.0, 6.0]);
    }

    #[test]
    fn non_monotonic_table_is_rejected_before_mutation() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(0.0, Scalar(1.0)).unwrap();
        ts.push(1.0, Scalar(2.0)).unwrap();
        let model = LatencyModel::Tabulated(vec![(0.0, 1.0), (1.0, 0.5), (0.5, 2.0)]);
        let err = apply_latency(&mut ts, &model).unwrap_err();
        assert!(matches!(err, SondageError::BadLatencyModel { .. }));
        // Untouched: atomic on failure.
        assert_eq!(ts.times(), &[0.0, 1.0]);
    }

    #[test]
    fn tabulated_latency_interpolates_the_delta() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(5.0, Scalar(1.0)).unwrap();
        let model = LatencyModel::Tabulated(vec![(0.0, 0.0), (10.0, 10.0)]);
        apply_latency(&mut ts, &model).unwrap();
        assert_eq!(ts.times(), &[10.0]);
    }

    #[test]
    fn boxcar_filter_averages_the_window() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        for i in 0..5 {
            ts.push(i as f64, Scalar(i as f64)).unwrap();
        }
        apply_filter(&mut ts, FilterModel::Boxcar { window: 2.0 });
        // At t=2, window [1,3] -> values [1,2,3] -> mean 2.0.
        let values: Vec<f64> = ts.iter().map(|(_, v)| v.0).collect();
        assert_eq!(values[2], 2.0);
    }

    #[test]
    fn channel_mask_union_and_contains() {
        let m = ChannelMask::NAV.union(ChannelMask::DEPTH);
        assert!(m.contains(ChannelMask::NAV));
        assert!(m.contains(ChannelMask::DEPTH));
        assert!(!m.contains(ChannelMask::HEADING));
        assert!(ChannelMask::ALL.contains(ChannelMask::SURVEY));
    }
}
