//! Topography oracle (C5).
//!
//! Builds, for one ping, a table of `(angle, xtrack, ltrack, altitude,
//! range)` rows spanning `angle_min..=angle_max`, either from a flat-bottom
//! assumption or by ray-marching a gridded bathymetry. Ported from
//! `mbsslayout`'s range-table builder: a nominal cross-track beam direction
//! is tilted by the platform's pitch to get the true takeoff direction,
//! then scaled so its down-component covers the given altitude. The
//! flat-bottom formula carries no roll term — a rolled platform shifts
//! where a beam strikes a flat bottom only through its pitch component,
//! since the nominal beam already spans the full roll-free swath.

/// One row of a built range table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeRow {
    pub angle_deg: f64,
    pub xtrack: f64,
    pub ltrack: f64,
    pub altitude: f64,
    /// Slant range to the bottom at this angle. `f64::INFINITY` marks a row
    /// the topography oracle could not resolve (grid edge); consumers skip
    /// these rows rather than treating them as data.
    pub range: f64,
}

#[derive(Debug, Clone)]
pub struct RangeTable {
    pub rows: Vec<RangeRow>,
}

impl RangeTable {
    /// Index of the row with the smallest finite range (the nadir-most row),
    /// used as the bracketing search's starting point by the sidescan
    /// layout engine.
    pub fn min_range_index(&self) -> Option<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.range.is_finite())
            .min_by(|a, b| a.1.range.partial_cmp(&b.1.range).unwrap())
            .map(|(i, _)| i)
    }
}

/// Tilt a nominal cross-track unit beam (no along-track component) by
/// pitch, matching the heading-then-pitch-then-roll composition order used
/// elsewhere, minus the heading and roll terms (the table is ship-relative
/// and carries no roll dependency). Returns `(along_track_component,
/// cross_track_component, down_component)`.
fn tilt_beam(angle_deg: f64, pitch_deg: f64) -> (f64, f64, f64) {
    let a = angle_deg.to_radians();
    let p = pitch_deg.to_radians();

    let y0 = a.sin(); // nominal cross-track component
    let z0 = a.cos(); // nominal down component

    // Pitch about the cross-track axis.
    let x2 = z0 * p.sin();
    let z2 = z0 * p.cos();

    (x2, y0, z2)
}

/// Build a range table assuming a flat bottom `altitude` metres below the
/// sensor, for `n` angles spanning `[angle_min, angle_max]` degrees.
pub fn build_flat_bottom_table(
    angle_min: f64,
    angle_max: f64,
    n: usize,
    altitude: f64,
    pitch: f64,
) -> RangeTable {
    let mut rows = Vec::with_capacity(n);
    let step = if n > 1 {
        (angle_max - angle_min) / (n - 1) as f64
    } else {
        0.0
    };
    for i in 0..n {
        let angle_deg = angle_min + step * i as f64;
        let (ltrack_unit, xtrack_unit, down_unit) = tilt_beam(angle_deg, pitch);
        if down_unit.abs() < 1e-9 {
            rows.push(RangeRow {
                angle_deg,
                xtrack: f64::INFINITY,
                ltrack: f64::INFINITY,
                altitude,
                range: f64::INFINITY,
            });
            continue;
        }
        let range = altitude / down_unit;
        rows.push(RangeRow {
            angle_deg,
            xtrack: range * xtrack_unit,
            ltrack: range * ltrack_unit,
            altitude,
            range: range.abs(),
        });
    }
    RangeTable { rows }
}

/// A gridded bathymetry surface, sampled in a local ship-centred metric
/// frame (xtrack, ltrack), with depth measured positive-down from the
/// sensor.
#[derive(Debug, Clone)]
pub struct TopoGrid {
    pub nx: usize,
    pub ny: usize,
    pub cell_size: f64,
    pub origin_xtrack: f64,
    pub origin_ltrack: f64,
    /// Row-major depth-below-sensor grid, `ny` rows of `nx` columns.
    pub depths: Vec<f64>,
}

impl TopoGrid {
    /// Bilinearly sample the grid's depth at `(xtrack, ltrack)`, or `None`
    /// outside the grid's footprint.
    pub fn depth_at(&self, xtrack: f64, ltrack: f64) -> Option<f64> {
        let gx = (xtrack - self.origin_xtrack) / self.cell_size;
        let gy = (ltrack - self.origin_ltrack) / self.cell_size;
        if gx < 0.0 || gy < 0.0 {
            return None;
        }
        let (i0, j0) = (gx.floor() as usize, gy.floor() as usize);
        if i0 + 1 >= self.nx || j0 + 1 >= self.ny {
            return None;
        }
        let fx = gx - i0 as f64;
        let fy = gy - j0 as f64;
        let at = |i: usize, j: usize| self.depths[j * self.nx + i];
        let d00 = at(i0, j0);
        let d10 = at(i0 + 1, j0);
        let d01 = at(i0, j0 + 1);
        let d11 = at(i0 + 1, j0 + 1);
        let d0 = d00 + (d10 - d00) * fx;
        let d1 = d01 + (d11 - d01) * fx;
        Some(d0 + (d1 - d0) * fy)
    }

    /// March a takeoff direction outward until the ray's depth meets the
    /// grid's topography, bisecting between the last two samples for a
    /// refined intersection. Returns `None` (grid edge) if the ray leaves
    /// the grid's footprint before intersecting.
    fn ray_intersect(
        &self,
        along_unit: f64,
        across_unit: f64,
        down_unit: f64,
        max_range: f64,
        step: f64,
    ) -> Option<(f64, f64, f64)> {
        let mut r = step;
        let mut prev = (0.0, 0.0, 0.0, 0.0);
        while r <= max_range {
            let xtrack = r * across_unit;
            let ltrack = r * along_unit;
            let ray_depth = r * down_unit;
            let Some(grid_depth) = self.depth_at(xtrack, ltrack) else {
                return None;
            };
            if ray_depth >= grid_depth {
                let (r0, x0, l0, d0) = prev;
                if r0 == 0.0 {
                    return Some((xtrack, ltrack, ray_depth));
                }
                let gd0 = self.depth_at(x0, l0).unwrap_or(d0);
                let f = (gd0 - d0) / ((gd0 - d0) - (grid_depth - ray_depth));
                let f = f.clamp(0.0, 1.0);
                let r_hit = r0 + f * (r - r0);
                return Some((r_hit * across_unit, r_hit * along_unit, r_hit * down_unit));
            }
            prev = (r, xtrack, ltrack, ray_depth);
            r += step;
        }
        None
    }

    /// Build a range table by ray-marching every angle through this grid.
    pub fn build_table(
        &self,
        angle_min: f64,
        angle_max: f64,
        n: usize,
        pitch: f64,
        max_range: f64,
        step: f64,
    ) -> RangeTable {
        let mut rows = Vec::with_capacity(n);
        let angle_step = if n > 1 {
            (angle_max - angle_min) / (n - 1) as f64
        } else {
            0.0
        };
        for i in 0..n {
            let angle_deg = angle_min + angle_step * i as f64;
            let (along_unit, across_unit, down_unit) = tilt_beam(angle_deg, pitch);
            match self.ray_intersect(along_unit, across_unit, down_unit, max_range, step) {
                Some((xtrack, ltrack, altitude)) => rows.push(RangeRow {
                    angle_deg,
                    xtrack,
                    ltrack,
                    altitude,
                    range: (xtrack * xtrack + ltrack * ltrack + altitude * altitude).sqrt(),
                }),
                None => rows.push(RangeRow {
                    angle_deg,
                    xtrack: f64::INFINITY,
                    ltrack: f64::INFINITY,
                    altitude: f64::INFINITY,
                    range: f64::INFINITY,
                }),
            }
        }
        RangeTable { rows }
    }
}
