//! Persistent project/session model (C8).
//!
//! A `Project` owns `File`s and `Crossing`s; a `File` owns its `Section`s.
//! A `Crossing` holds back-references `(file_id, section_id)` into the
//! project rather than owning pointers, and a `Tie` refers to snav indices
//! within its crossing's two sections — the pointer-graph-with-weak-back-
//! references shape replaced by stable index pairs into arena-style `Vec`s.

pub mod format;

use std::collections::BTreeMap;

use crate::error::SondageError;

pub const PROJECT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionStatus {
    None,
    Current,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Free,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingStatus {
    Unset,
    Skipped,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrueCrossing {
    BboxOnly,
    TrackIntersecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieInversionStatus {
    Unapplied,
    Current,
    Stale,
}

/// A geographic bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            west: f64::INFINITY,
            east: f64::NEG_INFINITY,
            south: f64::INFINITY,
            north: f64::NEG_INFINITY,
        }
    }

    pub fn expand(&mut self, lon: f64, lat: f64) {
        self.west = self.west.min(lon);
        self.east = self.east.max(lon);
        self.south = self.south.min(lat);
        self.north = self.north.max(lat);
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west <= other.east
            && self.east >= other.west
            && self.south <= other.north
            && self.north >= other.south
    }
}

/// A section-nav control point: a discrete, correctable point along a
/// section's trajectory.
#[derive(Debug, Clone, Copy)]
pub struct Snav {
    pub time: f64,
    pub lon: f64,
    pub lat: f64,
    pub x_correction: f64,
    pub y_correction: f64,
    pub z_correction: f64,
}

/// A time-bounded slice of a `File`, owning the pings whose global index
/// falls in `[start_index, end_index)`.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: u32,
    pub begin_time: f64,
    pub end_time: f64,
    pub start_index: u64,
    pub end_index: u64,
    pub bbox: BoundingBox,
    pub snav: Vec<Snav>,
    pub contours_up_to_date: bool,
}

impl Section {
    pub fn ping_count(&self) -> u64 {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn validate(&self) -> Result<(), SondageError> {
        for pair in self.snav.windows(2) {
            if pair[1].time <= pair[0].time {
                return Err(SondageError::InconsistentProject {
                    message: format!(
                        "section {} snav times are not strictly increasing",
                        self.id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Per-file import statistics, recomputed at the end of every import and
/// never persisted across reopen.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStats {
    pub record_count: u64,
    pub dropped_truncated: u64,
    pub dropped_out_of_order: u64,
    pub dropped_other: u64,
}

#[derive(Debug, Clone)]
pub struct File {
    pub id: u32,
    pub path: String,
    pub format_id: u32,
    pub heading_bias: f64,
    pub roll_bias: f64,
    pub status: FileStatus,
    pub sections: Vec<Section>,
    pub stats: FileStats,
}

impl File {
    pub fn validate(&self) -> Result<(), SondageError> {
        let mut prev_end_time: Option<f64> = None;
        let mut prev_end_index: Option<u64> = None;
        for section in &self.sections {
            if let Some(p) = prev_end_time {
                if section.begin_time < p {
                    return Err(SondageError::InconsistentProject {
                        message: format!("file {} sections are not time-contiguous", self.id),
                    });
                }
            }
            if let Some(p) = prev_end_index {
                if section.start_index != p {
                    return Err(SondageError::InconsistentProject {
                        message: format!("file {} sections are not index-contiguous", self.id),
                    });
                }
            }
            section.validate()?;
            prev_end_time = Some(section.end_time);
            prev_end_index = Some(section.end_index);
        }
        Ok(())
    }
}

/// A stable, non-owning reference to a `(file, section)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRef {
    pub file_id: u32,
    pub section_id: u32,
}

/// A tie's 3-D sigma magnitude and the orthonormal frame its principal axes
/// are expressed in.
#[derive(Debug, Clone, Copy)]
pub struct SigmaFrame {
    pub sigma: [f64; 3],
    pub basis: [[f64; 3]; 3],
}

impl SigmaFrame {
    pub fn is_orthonormal(&self) -> bool {
        const EPS: f64 = 1e-6;
        for row in &self.basis {
            let norm: f64 = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if (norm - 1.0).abs() > EPS {
                return false;
            }
        }
        for i in 0..3 {
            for j in (i + 1)..3 {
                let dot: f64 = (0..3).map(|k| self.basis[i][k] * self.basis[j][k]).sum();
                if dot.abs() > EPS {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tie {
    pub snav_a: u32,
    pub snav_b: u32,
    pub offset: [f64; 3],
    pub sigma: SigmaFrame,
    pub inversion_status: TieInversionStatus,
}

#[derive(Debug, Clone)]
pub struct Crossing {
    pub section_a: SectionRef,
    pub section_b: SectionRef,
    pub overlap: f64,
    pub true_crossing: TrueCrossing,
    pub status: CrossingStatus,
    pub ties: Vec<Tie>,
}

fn resolve_section(files: &[File], r: SectionRef) -> Result<&Section, SondageError> {
    files
        .get(r.file_id as usize)
        .and_then(|f| f.sections.get(r.section_id as usize))
        .ok_or_else(|| SondageError::InconsistentProject {
            message: format!(
                "dangling section reference (file {}, section {})",
                r.file_id, r.section_id
            ),
        })
}

impl Crossing {
    pub fn validate(&self, files: &[File]) -> Result<(), SondageError> {
        if self.section_a.file_id == self.section_b.file_id
            && self.section_a.section_id.abs_diff(self.section_b.section_id) <= 1
        {
            return Err(SondageError::InconsistentProject {
                message: "crossing links adjacent sections of the same file".into(),
            });
        }
        let sec_a = resolve_section(files, self.section_a)?;
        let sec_b = resolve_section(files, self.section_b)?;
        for tie in &self.ties {
            if tie.snav_a as usize >= sec_a.snav.len() || tie.snav_b as usize >= sec_b.snav.len() {
                return Err(SondageError::InconsistentProject {
                    message: "tie endpoint references a snav index out of range".into(),
                });
            }
            if !tie.sigma.is_orthonormal() {
                return Err(SondageError::InconsistentProject {
                    message: "tie sigma basis is not orthonormal".into(),
                });
            }
            if tie.sigma.sigma.iter().any(|&s| s <= 0.0) {
                return Err(SondageError::InconsistentProject {
                    message: "tie principal sigma must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub output_directory: String,
    pub decimation: u32,
    pub section_length: f64,
    pub section_soundings: u32,
    pub contour_interval: f64,
    pub color_interval: f64,
    pub tick_interval: f64,
    pub inversion_precision: f64,
    pub z_offset_width: f64,
    pub inversion_status: InversionStatus,
    pub open: bool,
    pub files: Vec<File>,
    pub crossings: Vec<Crossing>,
    pub metadata: BTreeMap<String, String>,
}

impl Project {
    pub fn new(name: impl Into<String>, output_directory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_directory: output_directory.into(),
            decimation: 1,
            section_length: 0.0,
            section_soundings: 0,
            contour_interval: 0.0,
            color_interval: 0.0,
            tick_interval: 0.0,
            inversion_precision: 1e-6,
            z_offset_width: 0.0,
            inversion_status: InversionStatus::None,
            open: true,
            files: Vec::new(),
            crossings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Append a newly imported file, assigning it the next dense id.
    pub fn add_file(&mut self, mut file: File) -> u32 {
        let id = self.files.len() as u32;
        file.id = id;
        self.files.push(file);
        id
    }

    pub fn iter_files(&self) -> impl Iterator<Item = &File> {
        self.files.iter()
    }

    pub fn iter_crossings_with_overlap_ge(&self, min_overlap: f64) -> impl Iterator<Item = &Crossing> {
        self.crossings.iter().filter(move |c| c.overlap >= min_overlap)
    }

    pub fn iter_ties(&self) -> impl Iterator<Item = &Tie> {
        self.crossings.iter().flat_map(|c| c.ties.iter())
    }

    /// Total pings across every section of every file.
    pub fn num_pings(&self) -> u64 {
        self.files
            .iter()
            .flat_map(|f| f.sections.iter())
            .map(|s| s.ping_count())
            .sum()
    }

    pub fn num_crossings(&self) -> usize {
        self.crossings.len()
    }

    pub fn num_crossings_analyzed(&self) -> usize {
        self.crossings
            .iter()
            .filter(|c| c.status != CrossingStatus::Unset)
            .count()
    }

    /// Merge freshly detected crossings into the project's list, preserving
    /// any existing crossing (and its operator ties) that matches the same
    /// section-id pair.
    pub fn merge_crossings(&mut self, detected: Vec<Crossing>) {
        for new_crossing in detected {
            let exists = self.crossings.iter().any(|c| {
                (c.section_a == new_crossing.section_a && c.section_b == new_crossing.section_b)
                    || (c.section_a == new_crossing.section_b && c.section_b == new_crossing.section_a)
            });
            if !exists {
                self.crossings.push(new_crossing);
            }
        }
    }

    pub fn add_tie(&mut self, crossing_idx: usize, tie: Tie) -> Result<(), SondageError> {
        let crossing = self.crossings.get_mut(crossing_idx).ok_or_else(|| {
            SondageError::InconsistentProject {
                message: format!("no crossing at index {crossing_idx}"),
            }
        })?;
        crossing.ties.push(tie);
        crossing.status = CrossingStatus::Set;
        self.inversion_status = InversionStatus::Stale;
        Ok(())
    }

    pub fn delete_tie(&mut self, crossing_idx: usize, tie_idx: usize) -> Result<(), SondageError> {
        let crossing = self.crossings.get_mut(crossing_idx).ok_or_else(|| {
            SondageError::InconsistentProject {
                message: format!("no crossing at index {crossing_idx}"),
            }
        })?;
        if tie_idx >= crossing.ties.len() {
            return Err(SondageError::InconsistentProject {
                message: format!("no tie at index {tie_idx} on crossing {crossing_idx}"),
            });
        }
        crossing.ties.remove(tie_idx);
        if crossing.ties.is_empty() {
            crossing.status = CrossingStatus::Unset;
        }
        self.inversion_status = InversionStatus::Stale;
        Ok(())
    }

    /// Update a file's bias corrections, invalidating the contour cache on
    /// every one of its sections.
    pub fn set_bias(&mut self, file_id: u32, heading_bias: f64, roll_bias: f64) -> Result<(), SondageError> {
        let file = self
            .files
            .get_mut(file_id as usize)
            .ok_or_else(|| SondageError::InconsistentProject {
                message: format!("no file with id {file_id}"),
            })?;
        file.heading_bias = heading_bias;
        file.roll_bias = roll_bias;
        for section in &mut file.sections {
            section.contours_up_to_date = false;
        }
        Ok(())
    }

    pub fn mark_inversion_current(&mut self) {
        self.inversion_status = InversionStatus::Current;
        for crossing in &mut self.crossings {
            for tie in &mut crossing.ties {
                tie.inversion_status = TieInversionStatus::Current;
            }
        }
    }

    pub fn mark_inversion_stale(&mut self) {
        self.inversion_status = InversionStatus::Stale;
    }

    /// Decode a `META*:` comment into the metadata dictionary. Comments
    /// without the prefix are not this function's concern (the pipeline
    /// passes them through to output unchanged).
    pub fn record_meta_comment(&mut self, comment: &str) -> bool {
        let Some(rest) = comment.strip_prefix("META") else {
            return false;
        };
        let Some(rest) = rest.strip_prefix(':') else {
            return false;
        };
        let Some((key, value)) = rest.split_once('=') else {
            return false;
        };
        self.metadata.insert(key.trim().to_string(), value.trim().to_string());
        true
    }

    pub fn validate(&self) -> Result<(), SondageError> {
        for file in &self.files {
            file.validate()?;
        }
        for crossing in &self.crossings {
            crossing.validate(&self.files)?;
        }
        if self.num_crossings_analyzed() > self.crossings.len() {
            return Err(SondageError::InconsistentProject {
                message: "more crossings analyzed than exist".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_sigma() -> SigmaFrame {
        SigmaFrame {
            sigma: [1.0, 1.0, 1.0],
            basis: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    fn sample_section(id: u32, start: u64, end: u64) -> Section {
        Section {
            id,
            begin_time: start as f64,
            end_time: end as f64,
            start_index: start,
            end_index: end,
            bbox: BoundingBox::empty(),
            snav: vec![
                Snav {
                    time: start as f64,
                    lon: 0.0,
                    lat: 0.0,
                    x_correction: 0.0,
                    y_correction: 0.0,
                    z_correction: 0.0,
                },
                Snav {
                    time: end as f64,
                    lon: 0.0,
                    lat: 0.0,
                    x_correction: 0.0,
                    y_correction: 0.0,
                    z_correction: 0.0,
                },
            ],
            contours_up_to_date: true,
        }
    }

    #[test]
    fn adding_a_tie_marks_the_project_and_crossing_stale_and_set() {
        let mut project = Project::new("survey", "/tmp/survey");
        let file = File {
            id: 0,
            path: "a.dat".into(),
            format_id: 1,
            heading_bias: 0.0,
            roll_bias: 0.0,
            status: FileStatus::Free,
            sections: vec![sample_section(0, 0, 10), sample_section(1, 10, 20), sample_section(2, 20, 30)],
            stats: FileStats::default(),
        };
        project.add_file(file);
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 0, section_id: 2 },
            overlap: 10.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Unset,
            ties: Vec::new(),
        });
        project.mark_inversion_current();

        project
            .add_tie(
                0,
                Tie {
                    snav_a: 0,
                    snav_b: 0,
                    offset: [1.0, 0.0, 0.0],
                    sigma: identity_sigma(),
                    inversion_status: TieInversionStatus::Unapplied,
                },
            )
            .unwrap();

        assert_eq!(project.inversion_status, InversionStatus::Stale);
        assert_eq!(project.crossings[0].status, CrossingStatus::Set);
    }

    #[test]
    fn validate_rejects_a_tie_referencing_an_out_of_range_snav() {
        let mut project = Project::new("survey", "/tmp/survey");
        let file = File {
            id: 0,
            path: "a.dat".into(),
            format_id: 1,
            heading_bias: 0.0,
            roll_bias: 0.0,
            status: FileStatus::Free,
            sections: vec![sample_section(0, 0, 10), sample_section(1, 10, 20), sample_section(2, 20, 30)],
            stats: FileStats::default(),
        };
        project.add_file(file);
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 0, section_id: 2 },
            overlap: 10.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Set,
            ties: vec![Tie {
                snav_a: 99,
                snav_b: 0,
                offset: [0.0, 0.0, 0.0],
                sigma: identity_sigma(),
                inversion_status: TieInversionStatus::Unapplied,
            }],
        });

        let err = project.validate().unwrap_err();
        assert!(matches!(err, SondageError::InconsistentProject { .. }));
    }

    #[test]
    fn validate_rejects_a_crossing_between_adjacent_sections_of_the_same_file() {
        let mut project = Project::new("survey", "/tmp/survey");
        let file = File {
            id: 0,
            path: "a.dat".into(),
            format_id: 1,
            heading_bias: 0.0,
            roll_bias: 0.0,
            status: FileStatus::Free,
            sections: vec![sample_section(0, 0, 10), sample_section(1, 10, 20)],
            stats: FileStats::default(),
        };
        project.add_file(file);
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 0, section_id: 1 },
            overlap: 10.0,
            true_crossing: TrueCrossing::BboxOnly,
            status: CrossingStatus::Unset,
            ties: Vec::new(),
        });

        let err = project.validate().unwrap_err();
        assert!(matches!(err, SondageError::InconsistentProject { .. }));
    }

    #[test]
    fn record_meta_comment_populates_the_metadata_dictionary() {
        let mut project = Project::new("survey", "/tmp/survey");
        assert!(project.record_meta_comment("META:operator=jdoe"));
        assert_eq!(project.metadata.get("operator").map(String::as_str), Some("jdoe"));
        assert!(!project.record_meta_comment("plain comment"));
    }

    #[test]
    fn num_pings_sums_section_ping_counts_across_files() {
        let mut project = Project::new("survey", "/tmp/survey");
        project.add_file(File {
            id: 0,
            path: "a.dat".into(),
            format_id: 1,
            heading_bias: 0.0,
            roll_bias: 0.0,
            status: FileStatus::Free,
            sections: vec![sample_section(0, 0, 10), sample_section(1, 10, 25)],
            stats: FileStats::default(),
        });
        assert_eq!(project.num_pings(), 25);
    }
}
