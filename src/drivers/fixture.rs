//! A deterministic, in-memory reference format driver.
//!
//! Real vendor datagram parsers are an external collaborator per the
//! system's scope; this driver exists so the pipeline is exercisable
//! end-to-end without one. Here the "file" is a line-oriented text
//! fixture: `open` validates its existence and a magic first line before
//! parsing, the same defensive-open pattern any concrete on-disk format
//! reader in this codebase follows.

use std::fs;
use std::io::Lines;
use std::io::{BufRead, BufReader};

use crate::drivers::{
    AltitudeRecord, AttitudeRecord, Capabilities, DepthRecord, FormatDriver, FormatId,
    HeadingRecord, NavRecord, NextRecord, Record, RecordTag, SoundSpeedRecord, SurveyRecord,
};
use crate::error::{RecordError, SondageError};

pub const FIXTURE_FORMAT_ID: FormatId = FormatId(1001);
const MAGIC: &str = "# sondage-fixture v1";

/// A reference driver reading the crate's own deterministic text fixture
/// format: one tagged line per record, e.g. `SURVEY t lon lat heading speed
/// depth altitude roll pitch heave`.
#[derive(Default)]
pub struct FixtureDriver {
    lines: Option<Lines<BufReader<fs::File>>>,
    last_error: Option<RecordError>,
}

impl FixtureDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatDriver for FixtureDriver {
    fn open(&mut self, path: &str, _format_hint: Option<FormatId>) -> Result<(), SondageError> {
        let file = fs::File::open(path).map_err(|e| SondageError::Io {
            message: format!("failed to open '{path}': {e}"),
        })?;
        let mut reader = BufReader::new(file).lines();
        let first = reader
            .next()
            .ok_or_else(|| SondageError::UnsupportedFormat {
                message: format!("'{path}' is empty"),
            })?
            .map_err(|e| SondageError::Io {
                message: e.to_string(),
            })?;
        if first.trim() != MAGIC {
            return Err(SondageError::UnsupportedFormat {
                message: format!("'{path}' does not carry the fixture magic header"),
            });
        }
        self.lines = Some(reader);
        Ok(())
    }

    fn next(&mut self) -> Result<NextRecord, SondageError> {
        self.last_error = None;
        let lines = self.lines.as_mut().ok_or_else(|| SondageError::Io {
            message: "driver not opened".into(),
        })?;

        loop {
            let Some(line) = lines.next() else {
                return Ok(NextRecord::EndOfStream);
            };
            let line = line.map_err(|e| SondageError::Io {
                message: e.to_string(),
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("COMMENT ") {
                return Ok(NextRecord::Record(Record::Comment(rest.to_string())));
            }

            match parse_record(line) {
                Ok(record) => return Ok(NextRecord::Record(record)),
                Err(message) => {
                    self.last_error = Some(RecordError { message });
                    continue;
                }
            }
        }
    }

    fn take_last_record_error(&mut self) -> Option<RecordError> {
        self.last_error.take()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            platform_source: RecordTag::Survey,
            nav_source: RecordTag::Nav,
            depth_source: RecordTag::Depth,
            heading_source: RecordTag::Heading,
            attitude_source: RecordTag::Attitude,
            svp_source: RecordTag::SoundSpeed,
            azimuth_offset_deg: 180.0,
        }
    }
}

fn parse_record(line: &str) -> Result<Record, String> {
    let mut parts = line.split_whitespace();
    let tag = parts.next().ok_or("empty record")?;
    let nums: Vec<f64> = parts
        .map(|p| p.parse::<f64>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;

    let need = |n: usize| -> Result<(), String> {
        if nums.len() < n {
            Err(format!("{tag} record needs {n} fields, got {}", nums.len()))
        } else {
            Ok(())
        }
    };

    match tag {
        "SURVEY" => {
            need(10)?;
            Ok(Record::Survey(SurveyRecord {
                time: nums[0],
                lon: nums[1],
                lat: nums[2],
                heading: nums[3],
                speed: nums[4],
                sensordepth: nums[5],
                altitude: nums[6],
                roll: nums[7],
                pitch: nums[8],
                heave: nums[9],
                raw_sidescan: None,
            }))
        }
        "NAV" => {
            need(4)?;
            Ok(Record::Nav(NavRecord {
                time: nums[0],
                lon: nums[1],
                lat: nums[2],
                speed: nums[3],
            }))
        }
        "ATTITUDE" => {
            need(4)?;
            Ok(Record::Attitude(AttitudeRecord {
                time: nums[0],
                roll: nums[1],
                pitch: nums[2],
                heave: nums[3],
            }))
        }
        "HEADING" => {
            need(2)?;
            Ok(Record::Heading(HeadingRecord {
                time: nums[0],
                heading: nums[1],
            }))
        }
        "DEPTH" => {
            need(2)?;
            Ok(Record::Depth(DepthRecord {
                time: nums[0],
                sensordepth: nums[1],
            }))
        }
        "ALTITUDE" => {
            need(2)?;
            Ok(Record::Altitude(AltitudeRecord {
                time: nums[0],
                altitude: nums[1],
            }))
        }
        "SOUNDSPEED" => {
            need(2)?;
            Ok(Record::SoundSpeed(SoundSpeedRecord {
                time: nums[0],
                soundspeed: nums[1],
            }))
        }
        other => Err(format!("unrecognized record tag '{other}'")),
    }
}

/// Write a fixture file from a sequence of lines, prefixing the magic
/// header. Used by tests and by the reference import tooling.
pub fn write_fixture(path: &std::path::Path, body: &str) -> std::io::Result<()> {
    let mut contents = String::from(MAGIC);
    contents.push('\n');
    contents.push_str(body);
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fixture_with(body: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        write_fixture(file.path(), body).unwrap();
        file
    }

    #[test]
    fn open_rejects_files_missing_the_magic_header() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "SURVEY 0 0 0 0 0 0 0 0 0 0\n").unwrap();
        let mut driver = FixtureDriver::new();
        let err = driver.open(file.path().to_str().unwrap(), None).unwrap_err();
        assert!(matches!(err, SondageError::UnsupportedFormat { .. }));
    }

    #[test]
    fn reads_survey_and_nav_records_in_order() {
        let file = fixture_with(
            "SURVEY 0.0 -10.0 20.0 90.0 2.0 0.0 50.0 0.0 0.0 0.0\n\
             NAV 0.5 -10.1 20.1 2.1\n",
        );
        let mut driver = FixtureDriver::new();
        driver.open(file.path().to_str().unwrap(), None).unwrap();

        match driver.next().unwrap() {
            NextRecord::Record(Record::Survey(s)) => assert_eq!(s.altitude, 50.0),
            other => panic!("unexpected first record: {other:?}", other = debug_variant(&other)),
        }
        match driver.next().unwrap() {
            NextRecord::Record(Record::Nav(n)) => assert_eq!(n.speed, 2.1),
            other => panic!("unexpected second record: {other:?}", other = debug_variant(&other)),
        }
        assert!(matches!(driver.next().unwrap(), NextRecord::EndOfStream));
    }

    #[test]
    fn malformed_records_are_dropped_not_fatal() {
        let file = fixture_with("SURVEY 0 0 0\nNAV 1.0 -10.0 20.0 2.0\n");
        let mut driver = FixtureDriver::new();
        driver.open(file.path().to_str().unwrap(), None).unwrap();

        // The malformed SURVEY line is skipped; the next call returns NAV.
        match driver.next().unwrap() {
            NextRecord::Record(Record::Nav(_)) => {}
            other => panic!("expected nav record: {other:?}", other = debug_variant(&other)),
        }
        assert!(driver.take_last_record_error().is_some());
    }

    #[test]
    fn comments_pass_through() {
        let file = fixture_with("COMMENT hello world\n");
        let mut driver = FixtureDriver::new();
        driver.open(file.path().to_str().unwrap(), None).unwrap();
        match driver.next().unwrap() {
            NextRecord::Record(Record::Comment(text)) => assert_eq!(text, "hello world"),
            other => panic!("expected comment: {other:?}", other = debug_variant(&other)),
        }
    }

    fn debug_variant(r: &NextRecord) -> &'static str {
        match r {
            NextRecord::Record(_) => "Record",
            NextRecord::EndOfStream => "EndOfStream",
        }
    }
}
