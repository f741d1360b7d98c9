//! Line-oriented, whitespace-separated on-disk project format.
//!
//! A project is a directory holding one `project.nvh` file: a header line
//! carrying [`PROJECT_FORMAT_VERSION`] ahead of every other field (so
//! future fields can be added without breaking older readers), then one
//! block per File/Section/Snav and one block per Crossing/Tie.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use super::{
    BoundingBox, Crossing, CrossingStatus, File, FileStats, FileStatus, InversionStatus, Project,
    Section, SectionRef, SigmaFrame, Snav, Tie, TieInversionStatus, TrueCrossing,
    PROJECT_FORMAT_VERSION,
};
use crate::error::SondageError;

pub fn save(project: &Project, dir: &Path) -> Result<(), SondageError> {
    fs::create_dir_all(dir)?;
    let path = dir.join("project.nvh");
    let mut w = fs::File::create(&path)?;

    writeln!(w, "MBNVH_VERSION {PROJECT_FORMAT_VERSION}")?;
    writeln!(w, "PROJECT {}", project.name)?;
    writeln!(w, "OUTPUT_DIR {}", project.output_directory)?;
    writeln!(w, "DECIMATION {}", project.decimation)?;
    writeln!(w, "SECTION_LENGTH {}", project.section_length)?;
    writeln!(w, "SECTION_SOUNDINGS {}", project.section_soundings)?;
    writeln!(w, "CONTOUR_INTERVAL {}", project.contour_interval)?;
    writeln!(w, "COLOR_INTERVAL {}", project.color_interval)?;
    writeln!(w, "TICK_INTERVAL {}", project.tick_interval)?;
    writeln!(w, "INVERSION_PRECISION {}", project.inversion_precision)?;
    writeln!(w, "ZOFFSET_WIDTH {}", project.z_offset_width)?;
    writeln!(w, "INVERSION_STATUS {}", inversion_status_str(project.inversion_status))?;
    writeln!(w, "OPEN {}", if project.open { 1 } else { 0 })?;
    writeln!(w, "NUM_FILES {}", project.files.len())?;
    writeln!(w, "NUM_CROSSINGS {}", project.crossings.len())?;
    writeln!(w, "NUM_META {}", project.metadata.len())?;
    for (key, value) in &project.metadata {
        writeln!(w, "META {key} {value}")?;
    }

    for file in &project.files {
        writeln!(
            w,
            "FILE {} {} {} {} {} {} {}",
            file.id,
            file.path,
            file.format_id,
            file.heading_bias,
            file.roll_bias,
            file_status_str(file.status),
            file.sections.len()
        )?;
        for section in &file.sections {
            writeln!(
                w,
                "SECTION {} {} {} {} {} {} {} {} {} {} {}",
                section.id,
                section.begin_time,
                section.end_time,
                section.start_index,
                section.end_index,
                section.bbox.west,
                section.bbox.east,
                section.bbox.south,
                section.bbox.north,
                if section.contours_up_to_date { 1 } else { 0 },
                section.snav.len()
            )?;
            for snav in &section.snav {
                writeln!(
                    w,
                    "SNAV {} {} {} {} {} {}",
                    snav.time, snav.lon, snav.lat, snav.x_correction, snav.y_correction, snav.z_correction
                )?;
            }
        }
    }

    for crossing in &project.crossings {
        writeln!(
            w,
            "CROSSING {} {} {} {} {} {} {} {}",
            crossing.section_a.file_id,
            crossing.section_a.section_id,
            crossing.section_b.file_id,
            crossing.section_b.section_id,
            crossing.overlap,
            true_crossing_str(crossing.true_crossing),
            crossing_status_str(crossing.status),
            crossing.ties.len()
        )?;
        for tie in &crossing.ties {
            let b = tie.sigma.basis;
            writeln!(
                w,
                "TIE {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
                tie.snav_a,
                tie.snav_b,
                tie.offset[0],
                tie.offset[1],
                tie.offset[2],
                tie.sigma.sigma[0],
                tie.sigma.sigma[1],
                tie.sigma.sigma[2],
                b[0][0], b[0][1], b[0][2],
                b[1][0], b[1][1], b[1][2],
                b[2][0], b[2][1], b[2][2],
                tie_inversion_status_str(tie.inversion_status)
            )?;
        }
    }

    w.flush()?;
    Ok(())
}

pub fn load(dir: &Path) -> Result<Project, SondageError> {
    let path = dir.join("project.nvh");
    let contents = fs::read_to_string(&path)?;
    let mut reader = Reader {
        lines: contents.lines(),
    };

    let tokens = reader.next_tokens()?;
    expect_tag(&tokens, "MBNVH_VERSION")?;
    let version: u32 = parse_field(&tokens, 1)?;
    if version != PROJECT_FORMAT_VERSION {
        return Err(SondageError::InconsistentProject {
            message: format!("unsupported project format version {version}"),
        });
    }

    let name = rest_of(&reader.next_tagged("PROJECT")?);
    let output_directory = rest_of(&reader.next_tagged("OUTPUT_DIR")?);
    let decimation = parse_field(&reader.next_tagged("DECIMATION")?, 1)?;
    let section_length = parse_field(&reader.next_tagged("SECTION_LENGTH")?, 1)?;
    let section_soundings = parse_field(&reader.next_tagged("SECTION_SOUNDINGS")?, 1)?;
    let contour_interval = parse_field(&reader.next_tagged("CONTOUR_INTERVAL")?, 1)?;
    let color_interval = parse_field(&reader.next_tagged("COLOR_INTERVAL")?, 1)?;
    let tick_interval = parse_field(&reader.next_tagged("TICK_INTERVAL")?, 1)?;
    let inversion_precision = parse_field(&reader.next_tagged("INVERSION_PRECISION")?, 1)?;
    let z_offset_width = parse_field(&reader.next_tagged("ZOFFSET_WIDTH")?, 1)?;
    let inversion_status = parse_inversion_status(&field(&reader.next_tagged("INVERSION_STATUS")?, 1)?)?;
    let open = parse_field::<u32>(&reader.next_tagged("OPEN")?, 1)? != 0;
    let num_files: usize = parse_field(&reader.next_tagged("NUM_FILES")?, 1)?;
    let num_crossings: usize = parse_field(&reader.next_tagged("NUM_CROSSINGS")?, 1)?;
    let num_meta: usize = parse_field(&reader.next_tagged("NUM_META")?, 1)?;

    let mut metadata = std::collections::BTreeMap::new();
    for _ in 0..num_meta {
        let tokens = reader.next_tagged("META")?;
        let key = field(&tokens, 1)?;
        let value = tokens.get(2..).map(|s| s.join(" ")).unwrap_or_default();
        metadata.insert(key, value);
    }

    let mut files = Vec::with_capacity(num_files);
    for _ in 0..num_files {
        let tokens = reader.next_tagged("FILE")?;
        let id: u32 = parse_field(&tokens, 1)?;
        let path = field(&tokens, 2)?;
        let format_id: u32 = parse_field(&tokens, 3)?;
        let heading_bias: f64 = parse_field(&tokens, 4)?;
        let roll_bias: f64 = parse_field(&tokens, 5)?;
        let status = parse_file_status(&field(&tokens, 6)?)?;
        let num_sections: usize = parse_field(&tokens, 7)?;

        let mut sections = Vec::with_capacity(num_sections);
        for _ in 0..num_sections {
            let tokens = reader.next_tagged("SECTION")?;
            let sec_id: u32 = parse_field(&tokens, 1)?;
            let begin_time: f64 = parse_field(&tokens, 2)?;
            let end_time: f64 = parse_field(&tokens, 3)?;
            let start_index: u64 = parse_field(&tokens, 4)?;
            let end_index: u64 = parse_field(&tokens, 5)?;
            let bbox = BoundingBox {
                west: parse_field(&tokens, 6)?,
                east: parse_field(&tokens, 7)?,
                south: parse_field(&tokens, 8)?,
                north: parse_field(&tokens, 9)?,
            };
            let contours_up_to_date = parse_field::<u32>(&tokens, 10)? != 0;
            let num_snav: usize = parse_field(&tokens, 11)?;

            let mut snav = Vec::with_capacity(num_snav);
            for _ in 0..num_snav {
                let tokens = reader.next_tagged("SNAV")?;
                snav.push(Snav {
                    time: parse_field(&tokens, 1)?,
                    lon: parse_field(&tokens, 2)?,
                    lat: parse_field(&tokens, 3)?,
                    x_correction: parse_field(&tokens, 4)?,
                    y_correction: parse_field(&tokens, 5)?,
                    z_correction: parse_field(&tokens, 6)?,
                });
            }

            sections.push(Section {
                id: sec_id,
                begin_time,
                end_time,
                start_index,
                end_index,
                bbox,
                snav,
                contours_up_to_date,
            });
        }

        files.push(File {
            id,
            path,
            format_id,
            heading_bias,
            roll_bias,
            status,
            sections,
            stats: FileStats::default(),
        });
    }

    let mut crossings = Vec::with_capacity(num_crossings);
    for _ in 0..num_crossings {
        let tokens = reader.next_tagged("CROSSING")?;
        let section_a = SectionRef {
            file_id: parse_field(&tokens, 1)?,
            section_id: parse_field(&tokens, 2)?,
        };
        let section_b = SectionRef {
            file_id: parse_field(&tokens, 3)?,
            section_id: parse_field(&tokens, 4)?,
        };
        let overlap: f64 = parse_field(&tokens, 5)?;
        let true_crossing = parse_true_crossing(&field(&tokens, 6)?)?;
        let status = parse_crossing_status(&field(&tokens, 7)?)?;
        let num_ties: usize = parse_field(&tokens, 8)?;

        let mut ties = Vec::with_capacity(num_ties);
        for _ in 0..num_ties {
            let tokens = reader.next_tagged("TIE")?;
            let snav_a: u32 = parse_field(&tokens, 1)?;
            let snav_b: u32 = parse_field(&tokens, 2)?;
            let offset = [
                parse_field(&tokens, 3)?,
                parse_field(&tokens, 4)?,
                parse_field(&tokens, 5)?,
            ];
            let sigma = [
                parse_field(&tokens, 6)?,
                parse_field(&tokens, 7)?,
                parse_field(&tokens, 8)?,
            ];
            let mut basis = [[0.0; 3]; 3];
            for (i, row) in basis.iter_mut().enumerate() {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell = parse_field(&tokens, 9 + i * 3 + j)?;
                }
            }
            let inversion_status = parse_tie_inversion_status(&field(&tokens, 18)?)?;
            ties.push(Tie {
                snav_a,
                snav_b,
                offset,
                sigma: SigmaFrame { sigma, basis },
                inversion_status,
            });
        }

        crossings.push(Crossing {
            section_a,
            section_b,
            overlap,
            true_crossing,
            status,
            ties,
        });
    }

    Ok(Project {
        name,
        output_directory,
        decimation,
        section_length,
        section_soundings,
        contour_interval,
        color_interval,
        tick_interval,
        inversion_precision,
        z_offset_width,
        inversion_status,
        open,
        files,
        crossings,
        metadata,
    })
}

struct Reader<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> Reader<'a> {
    fn next_tokens(&mut self) -> Result<Vec<String>, SondageError> {
        for line in self.lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(trimmed.split_whitespace().map(str::to_string).collect());
        }
        Err(SondageError::InconsistentProject {
            message: "unexpected end of project file".into(),
        })
    }

    fn next_tagged(&mut self, tag: &str) -> Result<Vec<String>, SondageError> {
        let tokens = self.next_tokens()?;
        expect_tag(&tokens, tag)?;
        Ok(tokens)
    }
}

fn expect_tag(tokens: &[String], tag: &str) -> Result<(), SondageError> {
    match tokens.first() {
        Some(t) if t == tag => Ok(()),
        other => Err(SondageError::InconsistentProject {
            message: format!("expected '{tag}' record, found {other:?}"),
        }),
    }
}

fn field(tokens: &[String], idx: usize) -> Result<String, SondageError> {
    tokens
        .get(idx)
        .cloned()
        .ok_or_else(|| SondageError::InconsistentProject {
            message: format!("missing field {idx} in record {tokens:?}"),
        })
}

fn parse_field<T: FromStr>(tokens: &[String], idx: usize) -> Result<T, SondageError> {
    let raw = field(tokens, idx)?;
    raw.parse::<T>().map_err(|_| SondageError::InconsistentProject {
        message: format!("could not parse field {idx} ('{raw}') in record {tokens:?}"),
    })
}

fn rest_of(tokens: &[String]) -> String {
    tokens.get(1..).map(|s| s.join(" ")).unwrap_or_default()
}

fn inversion_status_str(s: InversionStatus) -> &'static str {
    match s {
        InversionStatus::None => "None",
        InversionStatus::Current => "Current",
        InversionStatus::Stale => "Stale",
    }
}

fn parse_inversion_status(s: &str) -> Result<InversionStatus, SondageError> {
    match s {
        "None" => Ok(InversionStatus::None),
        "Current" => Ok(InversionStatus::Current),
        "Stale" => Ok(InversionStatus::Stale),
        other => Err(SondageError::InconsistentProject {
            message: format!("unknown inversion status '{other}'"),
        }),
    }
}

fn file_status_str(s: FileStatus) -> &'static str {
    match s {
        FileStatus::Free => "Free",
        FileStatus::Fixed => "Fixed",
    }
}

fn parse_file_status(s: &str) -> Result<FileStatus, SondageError> {
    match s {
        "Free" => Ok(FileStatus::Free),
        "Fixed" => Ok(FileStatus::Fixed),
        other => Err(SondageError::InconsistentProject {
            message: format!("unknown file status '{other}'"),
        }),
    }
}

fn crossing_status_str(s: CrossingStatus) -> &'static str {
    match s {
        CrossingStatus::Unset => "Unset",
        CrossingStatus::Skipped => "Skipped",
        CrossingStatus::Set => "Set",
    }
}

fn parse_crossing_status(s: &str) -> Result<CrossingStatus, SondageError> {
    match s {
        "Unset" => Ok(CrossingStatus::Unset),
        "Skipped" => Ok(CrossingStatus::Skipped),
        "Set" => Ok(CrossingStatus::Set),
        other => Err(SondageError::InconsistentProject {
            message: format!("unknown crossing status '{other}'"),
        }),
    }
}

fn true_crossing_str(s: TrueCrossing) -> &'static str {
    match s {
        TrueCrossing::BboxOnly => "BboxOnly",
        TrueCrossing::TrackIntersecting => "TrackIntersecting",
    }
}

fn parse_true_crossing(s: &str) -> Result<TrueCrossing, SondageError> {
    match s {
        "BboxOnly" => Ok(TrueCrossing::BboxOnly),
        "TrackIntersecting" => Ok(TrueCrossing::TrackIntersecting),
        other => Err(SondageError::InconsistentProject {
            message: format!("unknown crossing classification '{other}'"),
        }),
    }
}

fn tie_inversion_status_str(s: TieInversionStatus) -> &'static str {
    match s {
        TieInversionStatus::Unapplied => "Unapplied",
        TieInversionStatus::Current => "Current",
        TieInversionStatus::Stale => "Stale",
    }
}

fn parse_tie_inversion_status(s: &str) -> Result<TieInversionStatus, SondageError> {
    match s {
        "Unapplied" => Ok(TieInversionStatus::Unapplied),
        "Current" => Ok(TieInversionStatus::Current),
        "Stale" => Ok(TieInversionStatus::Stale),
        other => Err(SondageError::InconsistentProject {
            message: format!("unknown tie inversion status '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{FileStats, SigmaFrame};
    use tempfile::tempdir;

    fn sample_project() -> Project {
        let mut project = Project::new("demo-survey", "/tmp/demo-survey");
        project.metadata.insert("operator".into(), "jdoe".into());
        project.add_file(File {
            id: 0,
            path: "a.dat".into(),
            format_id: 1001,
            heading_bias: 0.5,
            roll_bias: -0.25,
            status: FileStatus::Free,
            sections: vec![
                Section {
                    id: 0,
                    begin_time: 0.0,
                    end_time: 100.0,
                    start_index: 0,
                    end_index: 1000,
                    bbox: BoundingBox {
                        west: -10.0,
                        east: -9.0,
                        south: 20.0,
                        north: 21.0,
                    },
                    snav: vec![Snav {
                        time: 0.0,
                        lon: -10.0,
                        lat: 20.0,
                        x_correction: 0.0,
                        y_correction: 0.0,
                        z_correction: 0.0,
                    }],
                    contours_up_to_date: true,
                },
                Section {
                    id: 1,
                    begin_time: 100.0,
                    end_time: 200.0,
                    start_index: 1000,
                    end_index: 2000,
                    bbox: BoundingBox {
                        west: -9.0,
                        east: -8.0,
                        south: 21.0,
                        north: 22.0,
                    },
                    snav: vec![Snav {
                        time: 100.0,
                        lon: -9.0,
                        lat: 21.0,
                        x_correction: 0.0,
                        y_correction: 0.0,
                        z_correction: 0.0,
                    }],
                    contours_up_to_date: false,
                },
            ],
            stats: FileStats::default(),
        });
        project.crossings.push(Crossing {
            section_a: SectionRef { file_id: 0, section_id: 0 },
            section_b: SectionRef { file_id: 0, section_id: 1 },
            overlap: 42.0,
            true_crossing: TrueCrossing::TrackIntersecting,
            status: CrossingStatus::Set,
            ties: vec![Tie {
                snav_a: 0,
                snav_b: 0,
                offset: [1.0, 2.0, 3.0],
                sigma: SigmaFrame {
                    sigma: [1.0, 1.0, 1.0],
                    basis: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                },
                inversion_status: TieInversionStatus::Stale,
            }],
        });
        project
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let project = sample_project();
        let dir = tempdir().unwrap();
        save(&project, dir.path()).unwrap();
        let loaded = load(dir.path()).unwrap();

        assert_eq!(loaded.name, project.name);
        assert_eq!(loaded.files.len(), project.files.len());
        assert_eq!(loaded.files[0].sections.len(), 2);
        assert_eq!(loaded.files[0].sections[1].contours_up_to_date, false);
        assert_eq!(loaded.crossings.len(), 1);
        assert_eq!(loaded.crossings[0].ties[0].offset, [1.0, 2.0, 3.0]);
        assert_eq!(loaded.metadata.get("operator").map(String::as_str), Some("jdoe"));
    }

    #[test]
    fn load_rejects_an_unsupported_format_version() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("project.nvh"), "MBNVH_VERSION 99\n").unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, SondageError::InconsistentProject { .. }));
    }
}
