//! Time-series store (C1).
//!
//! Stores one monotonically timestamped channel and answers interpolated
//! lookups in `O(log N)`, amortizing to `O(1)` for sequential queries via a
//! one-element bracket cache. Capacity grows geometrically the way
//! `Vec::push` already does, so no custom growth policy is needed beyond
//! `Vec::with_capacity` at construction.

use std::cell::Cell;

use crate::error::SondageError;

/// A channel sample kind, distinguishing the three interpolation rules the
/// system needs: ordinary linear interpolation, shortest-arc heading
/// unwrapping, and antimeridian-aware longitude unwrapping.
pub trait Sample: Copy {
    /// Linearly interpolate between `a` and `b` at fractional position
    /// `frac` in `[0, 1]`, applying this sample kind's wrap-around rule.
    fn interpolate(a: Self, b: Self, frac: f64) -> Self;

    fn into_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

/// An ordinary scalar channel (depth, altitude, speed, roll, pitch, ...).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scalar(pub f64);

impl Sample for Scalar {
    fn interpolate(a: Self, b: Self, frac: f64) -> Self {
        Scalar(a.0 + frac * (b.0 - a.0))
    }
    fn into_f64(self) -> f64 {
        self.0
    }
    fn from_f64(v: f64) -> Self {
        Scalar(v)
    }
}

/// A heading channel in degrees `[0, 360)`, interpolated on the shorter arc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heading(pub f64);

impl Sample for Heading {
    fn interpolate(a: Self, b: Self, frac: f64) -> Self {
        let mut delta = (b.0 - a.0) % 360.0;
        if delta > 180.0 {
            delta -= 360.0;
        } else if delta < -180.0 {
            delta += 360.0;
        }
        let mut h = a.0 + frac * delta;
        h = h.rem_euclid(360.0);
        Heading(h)
    }
    fn into_f64(self) -> f64 {
        self.0
    }
    fn from_f64(v: f64) -> Self {
        Heading(v.rem_euclid(360.0))
    }
}

/// A longitude channel in degrees `[-180, 180]`, unwrapped across the
/// antimeridian the same way heading unwraps across 0/360.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Longitude(pub f64);

impl Sample for Longitude {
    fn interpolate(a: Self, b: Self, frac: f64) -> Self {
        let mut delta = b.0 - a.0;
        if delta > 180.0 {
            delta -= 360.0;
        } else if delta < -180.0 {
            delta += 360.0;
        }
        let mut lon = a.0 + frac * delta;
        if lon > 180.0 {
            lon -= 360.0;
        } else if lon < -180.0 {
            lon += 360.0;
        }
        Longitude(lon)
    }
    fn into_f64(self) -> f64 {
        self.0
    }
    fn from_f64(v: f64) -> Self {
        Longitude(v)
    }
}

/// A monotonically non-decreasing `(time, value)` sequence with interpolated
/// lookup.
#[derive(Debug, Clone)]
pub struct TimeSeries<T: Sample> {
    times: Vec<f64>,
    values: Vec<T>,
    /// Index of the left endpoint of the last bracket returned, so
    /// sequential forward queries amortize to O(1).
    bracket_cache: Cell<usize>,
}

impl<T: Sample> TimeSeries<T> {
    pub fn new() -> Self {
        Self {
            times: Vec::new(),
            values: Vec::new(),
            bracket_cache: Cell::new(0),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            times: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            bracket_cache: Cell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Append a `(t, v)` sample. Fails with `OutOfOrder` if `t` is less than
    /// the last appended timestamp.
    pub fn push(&mut self, t: f64, v: T) -> Result<(), SondageError> {
        if let Some(&last_t) = self.times.last() {
            if t < last_t {
                return Err(SondageError::OutOfOrder { t, last_t });
            }
        }
        self.times.push(t);
        self.values.push(v);
        Ok(())
    }

    /// Binary-search for the bracketing pair around `t`, starting from the
    /// cached bracket to amortize sequential lookups.
    fn bracket(&self, t: f64) -> Option<(usize, usize)> {
        if self.times.is_empty() {
            return None;
        }
        if self.times.len() == 1 {
            return Some((0, 0));
        }

        let cached = self.bracket_cache.get().min(self.times.len() - 2);
        let (lo, hi) = if self.times[cached] <= t && t <= self.times[cached + 1] {
            (cached, cached + 1)
        } else {
            match self.times.binary_search_by(|probe| probe.partial_cmp(&t).unwrap()) {
                Ok(idx) => {
                    if idx == self.times.len() - 1 {
                        (idx.saturating_sub(1).max(0), idx)
                    } else {
                        (idx, idx + 1)
                    }
                }
                Err(idx) => {
                    if idx == 0 {
                        (0, 0)
                    } else if idx >= self.times.len() {
                        (self.times.len() - 1, self.times.len() - 1)
                    } else {
                        (idx - 1, idx)
                    }
                }
            }
        };
        self.bracket_cache.set(lo);
        Some((lo, hi))
    }

    /// Interpolate the value at time `t`. Outside the stored range, clamps
    /// to the nearest endpoint rather than extrapolating.
    pub fn interp(&self, t: f64) -> Option<T> {
        let (lo, hi) = self.bracket(t)?;
        if lo == hi {
            return Some(self.values[lo]);
        }
        let t0 = self.times[lo];
        let t1 = self.times[hi];
        if t <= t0 {
            return Some(self.values[lo]);
        }
        if t >= t1 {
            return Some(self.values[hi]);
        }
        let frac = (t - t0) / (t1 - t0);
        Some(T::interpolate(self.values[lo], self.values[hi], frac))
    }

    pub fn first_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, T)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<T> {
        &mut self.values
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Mutable access to timestamps, for latency correction. Callers must
    /// preserve (or re-validate) monotonicity.
    pub fn times_mut(&mut self) -> &mut Vec<f64> {
        self.bracket_cache.set(0);
        &mut self.times
    }
}

impl<T: Sample> Default for TimeSeries<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A paired longitude/latitude position time series, queried together so a
/// single interpolation fraction is reused for both channels (matching the
/// joint nav-position query used throughout the pipeline).
#[derive(Debug, Clone)]
pub struct PositionSeries {
    pub lon: TimeSeries<Longitude>,
    pub lat: TimeSeries<Scalar>,
}

impl PositionSeries {
    pub fn new() -> Self {
        Self {
            lon: TimeSeries::new(),
            lat: TimeSeries::new(),
        }
    }

    pub fn push(&mut self, t: f64, lon: f64, lat: f64) -> Result<(), SondageError> {
        self.lon.push(t, Longitude(lon))?;
        self.lat.push(t, Scalar(lat))?;
        Ok(())
    }

    /// Interpolated `(lon, lat)` at time `t`, longitude unwrapped across
    /// ±180°.
    pub fn interp_position(&self, t: f64) -> Option<(f64, f64)> {
        let lon = self.lon.interp(t)?.0;
        let lat = self.lat.interp(t)?.0;
        Some((lon, lat))
    }
}

impl Default for PositionSeries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_out_of_order_samples() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(1.0, Scalar(1.0)).unwrap();
        let err = ts.push(0.5, Scalar(2.0)).unwrap_err();
        assert!(matches!(err, SondageError::OutOfOrder { .. }));
    }

    #[test]
    fn interp_is_exact_at_sample_points() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        for i in 0..10 {
            ts.push(i as f64, Scalar((i * i) as f64)).unwrap();
        }
        for i in 0..10 {
            assert_eq!(ts.interp(i as f64).unwrap().0, (i * i) as f64);
        }
    }

    #[test]
    fn interp_clamps_outside_range_instead_of_extrapolating() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(10.0, Scalar(100.0)).unwrap();
        ts.push(20.0, Scalar(200.0)).unwrap();
        assert_eq!(ts.interp(0.0).unwrap().0, 100.0);
        assert_eq!(ts.interp(30.0).unwrap().0, 200.0);
    }

    #[test]
    fn interp_linear_midpoint() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(0.0, Scalar(0.0)).unwrap();
        ts.push(10.0, Scalar(100.0)).unwrap();
        assert_eq!(ts.interp(5.0).unwrap().0, 50.0);
    }

    #[test]
    fn heading_interpolates_on_shorter_arc_across_0_360() {
        let mut ts: TimeSeries<Heading> = TimeSeries::new();
        ts.push(0.0, Heading(350.0)).unwrap();
        ts.push(10.0, Heading(10.0)).unwrap();
        // Shortest arc from 350 to 10 is +20 degrees, not -340.
        let mid = ts.interp(5.0).unwrap().0;
        assert!((mid - 0.0).abs() < 1e-9, "expected ~0, got {mid}");
    }

    #[test]
    fn longitude_unwraps_across_antimeridian() {
        let mut ts: TimeSeries<Longitude> = TimeSeries::new();
        ts.push(0.0, Longitude(179.0)).unwrap();
        ts.push(10.0, Longitude(-179.0)).unwrap();
        let mid = ts.interp(5.0).unwrap().0;
        assert!((mid - 180.0).abs() < 1e-6 || (mid - (-180.0)).abs() < 1e-6);
    }

    #[test]
    fn sequential_lookups_use_the_bracket_cache() {
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        for i in 0..1000 {
            ts.push(i as f64, Scalar(i as f64)).unwrap();
        }
        for i in 0..1000 {
            assert_eq!(ts.interp(i as f64).unwrap().0, i as f64);
        }
    }

    #[test]
    fn position_series_interpolates_both_channels_together() {
        let mut ps = PositionSeries::new();
        ps.push(0.0, -170.0, 10.0).unwrap();
        ps.push(10.0, 170.0, 20.0).unwrap();
        let (lon, lat) = ps.interp_position(5.0).unwrap();
        assert!(lon.abs() > 175.0, "lon={lon}");
        assert_eq!(lat, 15.0);
    }

    #[test]
    fn latency_invariance_constant_zero_is_identity() {
        use crate::latency::{apply_latency, LatencyModel};
        let mut ts: TimeSeries<Scalar> = TimeSeries::new();
        ts.push(0.0, Scalar(1.0)).unwrap();
        ts.push(1.0, Scalar(2.0)).unwrap();
        let before: Vec<_> = ts.iter().collect();
        apply_latency(&mut ts, &LatencyModel::Constant(0.0)).unwrap();
        let after: Vec<_> = ts.iter().collect();
        assert_eq!(before, after);
    }
}
