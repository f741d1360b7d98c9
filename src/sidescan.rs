//! Sidescan layout engine (C6).
//!
//! Converts raw port/starboard backscatter time-series into a fixed-width
//! across-track pixel row, using a range table built by the topography
//! oracle (C5). Ported from `mbsslayout`'s main binning loop: altitude
//! selection, range-table lookup, per-sample binning by walking the table
//! outward from its minimum-range row, averaging, gap-fill, and optional
//! gain.

use crate::error::SondageError;
use crate::topo::RangeTable;

/// Amplitude sentinel marking a raw sample that should be skipped during
/// binning (e.g. a dropout or blanked sample), distinct from a legitimate
/// zero-amplitude return.
pub const INVALID_AMP: f64 = -1.0;

/// Output-pixel sentinel for a bin that received no samples.
pub const SIDESCAN_NULL: f64 = f64::NAN;

#[derive(Debug, Clone, Copy)]
pub enum AltitudeMode {
    UseExisting,
    BottomPick { threshold: f64, blanking: f64 },
    TopoGrid,
}

#[derive(Debug, Clone, Copy)]
pub enum SwathMode {
    Variable,
    Constant(f64),
}

#[derive(Debug, Clone, Copy)]
pub enum GainMode {
    Off,
    Tvg(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct SidescanConfig {
    pub pixels: usize,
    pub channel_swap: bool,
    pub swath: SwathMode,
    pub gain: GainMode,
    /// Maximum run length of consecutive null pixels to gap-fill.
    pub interpolation: usize,
}

/// Raw port/starboard channel payload for one ping.
pub struct RawChannels<'a> {
    pub port: &'a [f64],
    pub stbd: &'a [f64],
    pub sample_interval: f64,
    pub sound_speed: f64,
}

#[derive(Debug, Clone)]
pub struct LayoutResult {
    pub oss: Vec<f64>,
    pub along_track: Vec<f64>,
}

/// Find the first sample at or past `istart` whose amplitude is at least
/// `threshold` of the channel's peak amplitude. `istart` is not clamped to
/// the channel's length — see the design note on blanking-index clamping;
/// an `istart` past the end simply yields `None` rather than panicking.
fn bottom_pick(channel: &[f64], istart: usize, threshold: f64) -> Option<usize> {
    if istart >= channel.len() {
        return None;
    }
    let max_amp = channel.iter().cloned().fold(0.0_f64, f64::max);
    let cutoff = threshold * max_amp;
    channel[istart..]
        .iter()
        .position(|&a| a >= cutoff)
        .map(|i| i + istart)
}

/// Resolve the altitude to build the range table at.
pub fn select_altitude(
    mode: AltitudeMode,
    existing_altitude: f64,
    channels: &RawChannels,
    topo_altitude: Option<f64>,
) -> Result<f64, SondageError> {
    match mode {
        AltitudeMode::UseExisting => Ok(existing_altitude),
        AltitudeMode::TopoGrid => topo_altitude.ok_or_else(|| SondageError::Truncated {
            message: "topography oracle produced no altitude under this ping".into(),
        }),
        AltitudeMode::BottomPick { threshold, blanking } => {
            let istart = (blanking / channels.sample_interval) as usize;
            let port_pick = bottom_pick(channels.port, istart, threshold);
            let stbd_pick = bottom_pick(channels.stbd, istart, threshold);
            match (port_pick, stbd_pick) {
                (Some(p), Some(s)) => {
                    let mean_pick = (p + s) as f64 / 2.0;
                    Ok(0.5 * channels.sound_speed * channels.sample_interval * mean_pick)
                }
                _ => Err(SondageError::Truncated {
                    message: "bottom pick found no sample past the blanking window".into(),
                }),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn bin_channel(
    samples: &[f64],
    start_index: usize,
    range_per_sample: f64,
    table: &RangeTable,
    min_range_idx: usize,
    direction: i64,
    pixel_width: f64,
    pixels: usize,
    oss: &mut [f64],
    along_track: &mut [f64],
    bincount: &mut [u32],
) {
    if range_per_sample <= 0.0 || start_index >= samples.len() {
        return;
    }
    let mut idx = min_range_idx as i64;
    for i in start_index..samples.len() {
        let amp = samples[i];
        if amp == INVALID_AMP {
            continue;
        }
        let r = range_per_sample * i as f64;

        while {
            let next = idx + direction;
            next >= 0
                && (next as usize) < table.rows.len()
                && table.rows[next as usize].range.is_finite()
                && table.rows[next as usize].range <= r
        } {
            idx += direction;
        }

        let hi = idx + direction;
        if hi < 0 || hi as usize >= table.rows.len() {
            continue;
        }
        let lo_row = table.rows[idx as usize];
        let hi_row = table.rows[hi as usize];
        if !lo_row.range.is_finite() || !hi_row.range.is_finite() {
            continue;
        }
        if r < lo_row.range.min(hi_row.range) || r > lo_row.range.max(hi_row.range) {
            continue;
        }

        let span = hi_row.range - lo_row.range;
        let frac = if span.abs() > 1e-12 {
            (r - lo_row.range) / span
        } else {
            0.0
        };
        let xtrack = lo_row.xtrack + frac * (hi_row.xtrack - lo_row.xtrack);
        let ltrack = lo_row.ltrack + frac * (hi_row.ltrack - lo_row.ltrack);

        let j = (pixels as f64 / 2.0 + (xtrack / pixel_width).floor()) as i64;
        if j < 0 || j as usize >= pixels {
            continue;
        }
        let j = j as usize;
        oss[j] += amp;
        along_track[j] += ltrack;
        bincount[j] += 1;
    }
}

fn gap_fill(oss: &mut [f64], along_track: &mut [f64], limit: usize) {
    let n = oss.len();
    let mut i = 0;
    while i < n {
        if !oss[i].is_nan() {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && oss[i].is_nan() {
            i += 1;
        }
        let end = i;
        let run_len = end - start;
        if run_len <= limit && start > 0 && end < n {
            let (v0, l0) = (oss[start - 1], along_track[start - 1]);
            let (v1, l1) = (oss[end], along_track[end]);
            for (k, j) in (start..end).enumerate() {
                let frac = (k + 1) as f64 / (run_len + 1) as f64;
                oss[j] = v0 + frac * (v1 - v0);
                along_track[j] = l0 + frac * (l1 - l0);
            }
        }
    }
}

/// Lay out one ping's raw channels into canonical across-track pixels,
/// given a range table already built at the selected altitude.
pub fn layout_ping(
    channels: &RawChannels,
    altitude: f64,
    table: &RangeTable,
    config: &SidescanConfig,
) -> LayoutResult {
    let (port, stbd) = if config.channel_swap {
        (channels.stbd, channels.port)
    } else {
        (channels.port, channels.stbd)
    };

    let min_idx = table.min_range_index().unwrap_or(0);
    let min_range = table.rows[min_idx].range;
    let range_max = table
        .rows
        .iter()
        .filter(|r| r.range.is_finite())
        .map(|r| r.range)
        .fold(0.0_f64, f64::max);

    let swath = match config.swath {
        SwathMode::Constant(w) => w,
        SwathMode::Variable => 2.2 * (range_max * range_max - altitude * altitude).max(0.0).sqrt(),
    };
    let pixels = config.pixels.max(2);
    let pixel_width = swath / (pixels - 1) as f64;

    let mut oss = vec![0.0_f64; pixels];
    let mut along_track = vec![0.0_f64; pixels];
    let mut bincount = vec![0u32; pixels];

    let range_per_sample = 0.5 * channels.sound_speed * channels.sample_interval;
    let kstart = if range_per_sample > 0.0 && min_range.is_finite() {
        (min_range / range_per_sample).round() as usize
    } else {
        0
    };

    bin_channel(
        port,
        kstart,
        range_per_sample,
        table,
        min_idx,
        -1,
        pixel_width,
        pixels,
        &mut oss,
        &mut along_track,
        &mut bincount,
    );
    bin_channel(
        stbd,
        kstart,
        range_per_sample,
        table,
        min_idx,
        1,
        pixel_width,
        pixels,
        &mut oss,
        &mut along_track,
        &mut bincount,
    );

    for j in 0..pixels {
        if bincount[j] == 0 {
            oss[j] = SIDESCAN_NULL;
            along_track[j] = SIDESCAN_NULL;
        } else {
            oss[j] /= bincount[j] as f64;
            along_track[j] /= bincount[j] as f64;
        }
    }

    gap_fill(&mut oss, &mut along_track, config.interpolation);

    if let GainMode::Tvg(gain) = config.gain {
        for v in oss.iter_mut() {
            if !v.is_nan() {
                *v *= gain;
            }
        }
    }

    LayoutResult { oss, along_track }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::build_flat_bottom_table;

    fn step_channel(len: usize, step_at: usize, value: f64) -> Vec<f64> {
        (0..len)
            .map(|i| if i >= step_at { value } else { 0.0 })
            .collect()
    }

    #[test]
    fn flat_bottom_layout_fills_near_nadir_and_nulls_unreachable_edges() {
        // range_per_sample = 0.5 * 1500 * 1e-4 = 0.075 m/sample.
        // Sample 667 -> range = 50.0 m, matching the configured altitude.
        let port = step_channel(2048, 667, 100.0);
        let stbd = port.clone();
        let channels = RawChannels {
            port: &port,
            stbd: &stbd,
            sample_interval: 1e-4,
            sound_speed: 1500.0,
        };
        // angle range narrower than the configured swath so the far edges
        // of the pixel row fall outside anything the table can bracket.
        let table = build_flat_bottom_table(-60.0, 60.0, 121, 50.0, 0.0);
        let config = SidescanConfig {
            pixels: 41,
            channel_swap: false,
            swath: SwathMode::Constant(200.0),
            gain: GainMode::Off,
            interpolation: 0,
        };
        let result = layout_ping(&channels, 50.0, &table, &config);

        let nadir = result.oss[20];
        assert!((nadir - 100.0).abs() < 1e-6, "nadir pixel = {nadir}");
        assert!(result.oss[0].is_nan(), "expected far edge pixel to be null");
        assert!(
            result.oss[40].is_nan(),
            "expected far edge pixel to be null"
        );
    }

    #[test]
    fn bottom_pick_altitude_matches_the_blanked_threshold_crossing() {
        let port = step_channel(2048, 1000, 100.0);
        let stbd = port.clone();
        let channels = RawChannels {
            port: &port,
            stbd: &stbd,
            sample_interval: 1e-4,
            sound_speed: 1500.0,
        };
        let altitude = select_altitude(
            AltitudeMode::BottomPick {
                threshold: 0.5,
                blanking: 0.01,
            },
            0.0,
            &channels,
            None,
        )
        .unwrap();
        assert!((altitude - 75.0).abs() < 1e-6, "altitude = {altitude}");
    }

    #[test]
    fn bottom_pick_fails_when_no_sample_crosses_the_threshold() {
        let port = vec![0.0; 100];
        let stbd = vec![0.0; 100];
        let channels = RawChannels {
            port: &port,
            stbd: &stbd,
            sample_interval: 1e-4,
            sound_speed: 1500.0,
        };
        let err = select_altitude(
            AltitudeMode::BottomPick {
                threshold: 0.5,
                blanking: 0.0,
            },
            0.0,
            &channels,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SondageError::Truncated { .. }));
    }

    #[test]
    fn gap_fill_linearly_interpolates_short_null_runs() {
        let mut oss = vec![10.0, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 20.0];
        let mut along = vec![0.0; 6];
        gap_fill(&mut oss, &mut along, 5);
        assert!((oss[1] - 12.0).abs() < 1e-9);
        assert!((oss[2] - 14.0).abs() < 1e-9);
        assert!((oss[3] - 16.0).abs() < 1e-9);
        assert!((oss[4] - 18.0).abs() < 1e-9);
    }

    #[test]
    fn gap_fill_leaves_runs_longer_than_the_limit_null() {
        let mut oss = vec![10.0, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 20.0];
        let mut along = vec![0.0; 6];
        gap_fill(&mut oss, &mut along, 2);
        assert!(oss[2].is_nan());
    }

    #[test]
    fn channel_swap_flips_which_side_is_binned_as_port() {
        let port = step_channel(2048, 667, 100.0);
        let stbd = step_channel(2048, 667, 200.0);
        let channels = RawChannels {
            port: &port,
            stbd: &stbd,
            sample_interval: 1e-4,
            sound_speed: 1500.0,
        };
        let table = build_flat_bottom_table(-60.0, 60.0, 121, 50.0, 0.0);
        let base_config = SidescanConfig {
            pixels: 41,
            channel_swap: false,
            swath: SwathMode::Constant(200.0),
            gain: GainMode::Off,
            interpolation: 0,
        };
        let swapped_config = SidescanConfig {
            channel_swap: true,
            ..base_config
        };
        let normal = layout_ping(&channels, 50.0, &table, &base_config);
        let swapped = layout_ping(&channels, 50.0, &table, &swapped_config);
        // The pixel just to starboard of nadir differs between the two
        // channels (100 vs 200), so swapping must change at least one side.
        assert_ne!(normal.oss[25], swapped.oss[25]);
    }

    #[test]
    fn tvg_gain_scales_valid_pixels_only() {
        let port = step_channel(2048, 667, 100.0);
        let stbd = port.clone();
        let channels = RawChannels {
            port: &port,
            stbd: &stbd,
            sample_interval: 1e-4,
            sound_speed: 1500.0,
        };
        let table = build_flat_bottom_table(-60.0, 60.0, 121, 50.0, 0.0);
        let config = SidescanConfig {
            pixels: 41,
            channel_swap: false,
            swath: SwathMode::Constant(200.0),
            gain: GainMode::Tvg(2.0),
            interpolation: 0,
        };
        let result = layout_ping(&channels, 50.0, &table, &config);
        assert!((result.oss[20] - 200.0).abs() < 1e-6);
        assert!(result.oss[0].is_nan());
    }
}
