//! Format driver interface (C2).
//!
//! A driver is a per-vendor adapter that yields a stream of typed records.
//! Dynamic dispatch on an integer format id (as in a legacy vendor-datagram
//! table keyed by format code) is replaced here by a trait object keyed by
//! a [`FormatId`] newtype, per the redesign note on dynamic dispatch.

pub mod fixture;

use crate::error::SondageError;

/// A driver-specific format identifier, analogous to a vendor's numeric
/// format code but opaque outside the registry that resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatId(pub u32);

/// One decoded record from a format driver's stream.
#[derive(Debug, Clone)]
pub enum Record {
    Survey(SurveyRecord),
    Nav(NavRecord),
    Attitude(AttitudeRecord),
    Heading(HeadingRecord),
    Depth(DepthRecord),
    Altitude(AltitudeRecord),
    SoundSpeed(SoundSpeedRecord),
    Comment(String),
    Other,
}

#[derive(Debug, Clone)]
pub struct SurveyRecord {
    pub time: f64,
    pub lon: f64,
    pub lat: f64,
    pub heading: f64,
    pub speed: f64,
    pub sensordepth: f64,
    pub altitude: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heave: f64,
    /// Raw backscatter payload, present only for drivers that carry raw
    /// sidescan time series on their survey record.
    pub raw_sidescan: Option<RawSidescan>,
}

#[derive(Debug, Clone)]
pub struct RawSidescan {
    pub sample_interval: f64,
    pub sound_speed: f64,
    pub port_samples: Vec<f64>,
    pub stbd_samples: Vec<f64>,
    pub beamwidth_xtrack: f64,
    pub beamwidth_ltrack: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct NavRecord {
    pub time: f64,
    pub lon: f64,
    pub lat: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AttitudeRecord {
    pub time: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heave: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct HeadingRecord {
    pub time: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthRecord {
    pub time: f64,
    pub sensordepth: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AltitudeRecord {
    pub time: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SoundSpeedRecord {
    pub time: f64,
    pub soundspeed: f64,
}

/// Which record tag carries each ancillary channel for a given format, and
/// the heading-angle convention used to derive `angles_forward` from beam
/// geometry. The angle offset is per-format because non-Simrad formats may
/// not use the `180 - azimuth` convention.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub platform_source: RecordTag,
    pub nav_source: RecordTag,
    pub depth_source: RecordTag,
    pub heading_source: RecordTag,
    pub attitude_source: RecordTag,
    pub svp_source: RecordTag,
    /// Degrees subtracted from 180 to derive `angles_forward` from a raw
    /// ping azimuth (`180 - png_azimuth` for Simrad-convention formats).
    pub azimuth_offset_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    Survey,
    Nav,
    Attitude,
    Heading,
    Depth,
    Altitude,
    SoundSpeed,
}

/// End-of-stream sentinel returned by `next` once a driver is exhausted.
pub enum NextRecord {
    Record(Record),
    EndOfStream,
}

/// A format driver: opens a survey file and yields a typed record stream.
pub trait FormatDriver {
    /// Open a handle to `path`. `format_hint` lets a caller disambiguate
    /// when the same extension is used by more than one vendor format.
    fn open(&mut self, path: &str, format_hint: Option<FormatId>) -> Result<(), SondageError>;

    /// Read the next record, or `EndOfStream` once the file is exhausted.
    /// A malformed record returns `Ok` with `Record::Other` and the error is
    /// surfaced through `take_last_record_error` so the pipeline can log and
    /// drop it without aborting.
    fn next(&mut self) -> Result<NextRecord, SondageError>;

    /// Consume the decode error (if any) produced by the most recent `next`
    /// call, so callers can log-and-drop per the record-level error rule.
    fn take_last_record_error(&mut self) -> Option<crate::error::RecordError>;

    fn capabilities(&self) -> Capabilities;

    /// Extract raw port/starboard time series from a survey record, for
    /// formats that carry one. Fails with `UnsupportedFormat` if the record
    /// kind cannot carry raw sidescan.
    fn extract_raw_ss(&self, record: &Record) -> Result<RawSidescan, SondageError> {
        match record {
            Record::Survey(s) => s
                .raw_sidescan
                .clone()
                .ok_or_else(|| SondageError::UnsupportedFormat {
                    message: "survey record carries no raw sidescan payload".into(),
                }),
            _ => Err(SondageError::UnsupportedFormat {
                message: "record kind cannot carry raw sidescan".into(),
            }),
        }
    }
}
