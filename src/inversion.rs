//! Tie graph and inversion driver (C10).
//!
//! Builds a sparse linear system from a project's `Set` crossings and their
//! ties, solves it for per-snav corrections, and writes the corrections
//! back into the project. Modeled on `mbnavadjust`'s Gauss-Newton tie
//! inversion, generalized so the linear-algebra core is pluggable behind
//! [`TieSolver`] rather than hard-wired to one dense solver.

use crate::error::SondageError;
use crate::project::{CrossingStatus, FileStatus, Project, SigmaFrame, TieInversionStatus};

/// One unknown in the inversion: a file's snav block gets one 3-vector
/// correction (x, y, z) per snav point that participates in a tie. Pinned
/// unknowns (belonging to a `Fixed` file) are held at zero and excluded
/// from the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownId {
    pub file_id: u32,
    pub section_id: u32,
    pub snav_index: u32,
}

/// One row of the linear system: a tie between two unknowns' corrections
/// and an observed offset, expressed in the tie's own sigma frame. The
/// residual this contributes to the solve is one scalar per principal axis
/// of `sigma` — `basis[k] . (correction_b - correction_a - offset)`,
/// weighted by `1 / sigma.sigma[k]` — not a raw per-(x, y, z) residual.
#[derive(Debug, Clone)]
pub struct TieEquation {
    pub crossing_index: usize,
    pub tie_index: usize,
    pub a: UnknownId,
    pub b: UnknownId,
    pub offset: [f64; 3],
    pub sigma: SigmaFrame,
}

/// The assembled system: the unknowns in solve order (pinned unknowns are
/// never listed) and the equations referencing them by index into
/// `unknowns`, or `None` when an equation's endpoint is pinned.
pub struct TieSystem {
    pub unknowns: Vec<UnknownId>,
    pub equations: Vec<TieEquation>,
}

fn unknown_index(unknowns: &[UnknownId], id: UnknownId) -> Option<usize> {
    unknowns.iter().position(|u| *u == id)
}

/// Build the system from every `Set` crossing's ties. A file's `Fixed`
/// status pins every one of its snav corrections to zero; such unknowns are
/// left out of `unknowns` entirely (their column is implicitly zero).
pub fn build_system(project: &Project) -> TieSystem {
    let mut unknowns: Vec<UnknownId> = Vec::new();
    let mut equations = Vec::new();

    let is_fixed = |file_id: u32| -> bool {
        project
            .files
            .get(file_id as usize)
            .is_some_and(|f| f.status == FileStatus::Fixed)
    };

    for (crossing_index, crossing) in project.crossings.iter().enumerate() {
        if crossing.status != CrossingStatus::Set {
            continue;
        }
        for (tie_index, tie) in crossing.ties.iter().enumerate() {
            let a = UnknownId {
                file_id: crossing.section_a.file_id,
                section_id: crossing.section_a.section_id,
                snav_index: tie.snav_a,
            };
            let b = UnknownId {
                file_id: crossing.section_b.file_id,
                section_id: crossing.section_b.section_id,
                snav_index: tie.snav_b,
            };
            if !is_fixed(a.file_id) && unknown_index(&unknowns, a).is_none() {
                unknowns.push(a);
            }
            if !is_fixed(b.file_id) && unknown_index(&unknowns, b).is_none() {
                unknowns.push(b);
            }
            equations.push(TieEquation {
                crossing_index,
                tie_index,
                a,
                b,
                offset: tie.offset,
                sigma: tie.sigma,
            });
        }
    }

    TieSystem { unknowns, equations }
}

/// The solved correction for each free unknown, in the same order as
/// [`TieSystem::unknowns`].
pub type Solution = Vec<[f64; 3]>;

/// Anything that can turn a [`TieSystem`] into a [`Solution`]. Kept as a
/// trait so an alternate (e.g. sparse, iterative) solver can replace the
/// reference dense one without touching the assembly or write-back code.
pub trait TieSolver {
    fn solve(&self, system: &TieSystem) -> Result<Solution, SondageError>;
}

/// Reference solver: dense Gauss-Newton normal equations, since each tie
/// residual is already linear in the unknowns (correction_b - correction_a
/// == offset), this reduces to one weighted-least-squares solve per axis.
pub struct NormalEquationsSolver {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for NormalEquationsSolver {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-9,
        }
    }
}

fn dot3(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// One scalar row of the flattened 3n-unknown system: `sum(coeff * x) ==
/// rhs`, weighted by `weight`. A tie contributes one `Row` per principal
/// axis of its sigma frame, each mixing all three (x, y, z) components of
/// its two endpoints through that axis's basis vector.
struct Row {
    terms: Vec<(usize, f64)>,
    rhs: f64,
    weight: f64,
}

fn row_value(row: &Row, x: &[f64]) -> f64 {
    row.terms.iter().map(|&(j, c)| c * x[j]).sum()
}

/// Build one scalar row per principal axis of each tie's sigma frame: a
/// free endpoint contributes `basis[k]` (negated for `a`) across its three
/// flattened (x, y, z) slots; a pinned endpoint contributes nothing, since
/// its correction is held at zero.
fn build_rows(system: &TieSystem) -> Vec<Row> {
    let mut rows = Vec::with_capacity(system.equations.len() * 3);
    for eq in &system.equations {
        let ia = unknown_index(&system.unknowns, eq.a);
        let ib = unknown_index(&system.unknowns, eq.b);
        for k in 0..3 {
            let basis_k = eq.sigma.basis[k];
            let weight = 1.0 / eq.sigma.sigma[k];
            let rhs = dot3(basis_k, eq.offset);
            let mut terms = Vec::with_capacity(6);
            if let Some(ib) = ib {
                for c in 0..3 {
                    terms.push((3 * ib + c, basis_k[c]));
                }
            }
            if let Some(ia) = ia {
                for c in 0..3 {
                    terms.push((3 * ia + c, -basis_k[c]));
                }
            }
            rows.push(Row { terms, rhs, weight });
        }
    }
    rows
}

/// Coordinate-descent (Gauss-Seidel) solve of the weighted least-squares
/// system the tie rows define: for the small, sparse-by-construction
/// systems a tie graph produces (a handful of free unknowns per connected
/// component), a few dozen sweeps converge well inside `tolerance` without
/// needing a full factorization or explicit normal-equations matrix.
fn gauss_seidel_flat(dim: usize, rows: &[Row], max_iterations: usize, tolerance: f64) -> Vec<f64> {
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); dim];
    for (row_index, row) in rows.iter().enumerate() {
        for &(slot, coeff) in &row.terms {
            adjacency[slot].push((row_index, coeff));
        }
    }

    let mut x = vec![0.0_f64; dim];
    for _ in 0..max_iterations {
        let mut max_delta = 0.0_f64;
        for slot in 0..dim {
            if adjacency[slot].is_empty() {
                continue;
            }
            let mut numerator = 0.0_f64;
            let mut denominator = 0.0_f64;
            for &(row_index, coeff) in &adjacency[slot] {
                let row = &rows[row_index];
                let without_slot = row_value(row, &x) - coeff * x[slot];
                numerator += row.weight * coeff * (row.rhs - without_slot);
                denominator += row.weight * coeff * coeff;
            }
            if denominator > 0.0 {
                let updated = numerator / denominator;
                max_delta = max_delta.max((updated - x[slot]).abs());
                x[slot] = updated;
            }
        }
        if max_delta < tolerance {
            break;
        }
    }
    x
}

impl TieSolver for NormalEquationsSolver {
    fn solve(&self, system: &TieSystem) -> Result<Solution, SondageError> {
        let n = system.unknowns.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let rows = build_rows(system);
        let x = gauss_seidel_flat(3 * n, &rows, self.max_iterations, self.tolerance);

        let mut residual_sq = 0.0_f64;
        for row in &rows {
            let residual = row_value(row, &x) - row.rhs;
            residual_sq += row.weight * residual * residual;
        }
        if !residual_sq.is_finite() {
            return Err(SondageError::SolverDiverged {
                message: "tie residuals did not converge to a finite value".into(),
            });
        }

        Ok((0..n).map(|k| [x[3 * k], x[3 * k + 1], x[3 * k + 2]]).collect())
    }
}

/// Run the inversion end-to-end: assemble, solve, and write corrected snav
/// offsets back into `project`, marking every `Set` tie and the project's
/// `inversion_status` as `Current`. On solver failure the project is left
/// untouched (§7's `SolverDiverged` failure model).
pub fn invert(project: &mut Project, solver: &dyn TieSolver) -> Result<(), SondageError> {
    let system = build_system(project);
    let solution = solver.solve(&system)?;

    for (unknown, correction) in system.unknowns.iter().zip(solution.iter()) {
        let Some(file) = project.files.get_mut(unknown.file_id as usize) else {
            continue;
        };
        let Some(section) = file.sections.get_mut(unknown.section_id as usize) else {
            continue;
        };
        let Some(snav) = section.snav.get_mut(unknown.snav_index as usize) else {
            continue;
        };
        snav.x_correction = correction[0];
        snav.y_correction = correction[1];
        snav.z_correction = correction[2];
    }

    project.mark_inversion_current();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{BoundingBox, Crossing, File, FileStats, Section, SectionRef, SigmaFrame, Snav, Tie, TrueCrossing};

    fn identity_sigma() -> SigmaFrame {
        SigmaFrame {
            sigma: [1.0, 1.0, 1.0],
            basis: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    fn section_with_one_snav(id: u32) -> Section {
        Section {
            id,
            begin_time: id as f64,
            end_time: id as f64 + 1.0,
            start_index: 0,
            end_index: 1,
            bbox: BoundingBox::empty(),
            snav: vec![Snav {
                time: id as f64,
                lon: 0.0,
                lat: 0.0,
                x_correction: 0.0,
                y_correction: 0.0,
                z_correction: 0.0,
            }],
            contours_up_to_date: true,
        }
    }

    fn file(id: u32, status: FileStatus) -> File {
        File {
            id,
            path: format!("file-{id}.dat"),
            format_id: 1,
            heading_bias: 0.0,
            roll_bias: 0.0,
            status,
            sections: vec![section_with_one_snav(0)],
            stats: FileStats::default(),
        }
    }

    fn tie(offset: [f64; 3]) -> Tie {
        Tie {
            snav_a: 0,
            snav_b: 0,
            offset,
            sigma: identity_sigma(),
            inversion_status: TieInversionStatus::Unapplied,
        }
    }

    /// Three files, one `Fixed`, two `Set` crossings tying the free files
    /// back to it with offsets (1,0,0) and (0,1,0) respectively. The
    /// inversion should move file 1 by (1,0,0) and file 2 by (0,1,0),
    /// zeroing both residuals.
    #[test]
    fn three_file_star_topology_solves_both_ties_to_near_zero_residual() {
        let mut project = Project::new("survey", "/tmp/survey");
        project.add_file(file(0, FileStatus::Fixed));
        project.add_file(file(1, FileStatus::Free));
        project.add_file(file(2, FileStatus::Free));

        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 1, section_id: 0 },
            overlap: 50.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Set,
            ties: vec![tie([1.0, 0.0, 0.0])],
        });
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 2, section_id: 0 },
            overlap: 50.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Set,
            ties: vec![tie([0.0, 1.0, 0.0])],
        });

        let solver = NormalEquationsSolver::default();
        invert(&mut project, &solver).unwrap();

        let corrected_1 = &project.files[1].sections[0].snav[0];
        let corrected_2 = &project.files[2].sections[0].snav[0];
        assert!((corrected_1.x_correction - 1.0).abs() < 1e-6);
        assert!(corrected_1.y_correction.abs() < 1e-6);
        assert!((corrected_2.y_correction - 1.0).abs() < 1e-6);
        assert!(corrected_2.x_correction.abs() < 1e-6);
        assert_eq!(project.inversion_status, crate::project::InversionStatus::Current);
    }

    #[test]
    fn unset_crossings_are_excluded_from_the_system() {
        let mut project = Project::new("survey", "/tmp/survey");
        project.add_file(file(0, FileStatus::Fixed));
        project.add_file(file(1, FileStatus::Free));
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 1, section_id: 0 },
            overlap: 50.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Unset,
            ties: vec![tie([1.0, 0.0, 0.0])],
        });

        let system = build_system(&project);
        assert!(system.equations.is_empty());
    }

    #[test]
    fn fixed_files_never_appear_among_the_free_unknowns() {
        let mut project = Project::new("survey", "/tmp/survey");
        project.add_file(file(0, FileStatus::Fixed));
        project.add_file(file(1, FileStatus::Free));
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 1, section_id: 0 },
            overlap: 50.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Set,
            ties: vec![tie([1.0, 0.0, 0.0])],
        });

        let system = build_system(&project);
        assert_eq!(system.unknowns.len(), 1);
        assert_eq!(system.unknowns[0].file_id, 1);
    }
}
