//! Ping-output file codec (§6.2).
//!
//! Fixed-size binary records: a 7-field timestamp, scaled-integer
//! navigation and attitude fields, one bathymetry sample, and a
//! variable-width row of sidescan pixels with paired along-track offsets.
//! Modeled on the legacy canonical sidescan format (format id 71), using
//! the same `byteorder` read/write-extension style as other binary log
//! codecs in this codebase, with big-endian scaled integers the way
//! MB-System's on-disk swath formats are laid out.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::SondageError;
use crate::pipeline::Ping;

/// Sentinel written for a sidescan pixel or along-track offset that carries
/// no data.
pub const INVALID_SS: i16 = -32768;

const LON_LAT_SCALE: f64 = 1.0e7;
const SPEED_SCALE: f64 = 100.0; // cm/s
const ANGLE_SCALE: f64 = 100.0; // 0.01 degree
const DEPTH_SCALE: f64 = 1000.0; // mm
const AMPLITUDE_SCALE: f64 = 100.0; // 0.01 dB
const OFFSET_SCALE: f64 = 100.0; // 0.01 m

/// Decompose a Unix epoch timestamp into MB-System's 7-field time tag:
/// year, julian day, hour, minute, second, and millisecond-of-second as two
/// fields (whole and fractional thousandths), matching the historical
/// layout of `time_i`/`time_j` arrays.
fn seven_field_timestamp(epoch_seconds: f64) -> [i32; 7] {
    const SECONDS_PER_DAY: i64 = 86_400;
    let whole_seconds = epoch_seconds.floor() as i64;
    let fractional = epoch_seconds - whole_seconds as f64;
    let days_since_epoch = whole_seconds.div_euclid(SECONDS_PER_DAY);
    let seconds_of_day = whole_seconds.rem_euclid(SECONDS_PER_DAY);

    // 1970-01-01 is a fixed epoch; walk forward/backward in whole years
    // using the proleptic Gregorian calendar's leap rule.
    let mut year = 1970i32;
    let mut remaining_days = days_since_epoch;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days >= 0 && remaining_days < days_in_year {
            break;
        }
        if remaining_days < 0 {
            year -= 1;
            remaining_days += if is_leap_year(year) { 366 } else { 365 };
        } else {
            remaining_days -= days_in_year;
            year += 1;
        }
    }
    let julian_day = remaining_days as i32 + 1;
    let hour = (seconds_of_day / 3600) as i32;
    let minute = ((seconds_of_day % 3600) / 60) as i32;
    let second = (seconds_of_day % 60) as i32;
    let millisecond = (fractional * 1000.0).round() as i32;

    [year, julian_day, hour, minute, second, 0, millisecond]
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn scale_to_i32(value: f64, scale: f64) -> i32 {
    (value * scale).round() as i32
}

fn scale_to_i16_or_invalid(value: f64, scale: f64) -> i16 {
    if !value.is_finite() {
        return INVALID_SS;
    }
    (value * scale).round().clamp(i16::MIN as f64 + 1.0, i16::MAX as f64) as i16
}

/// Write one ping record: the header fields, then `pixels` interleaved
/// `(amplitude, along_track_offset)` pairs, in pixel order.
pub fn write_ping<W: Write>(writer: &mut W, ping: &Ping) -> Result<(), SondageError> {
    for field in seven_field_timestamp(ping.time) {
        writer.write_i32::<BigEndian>(field)?;
    }
    writer.write_i32::<BigEndian>(scale_to_i32(ping.lon, LON_LAT_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.lat, LON_LAT_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.speed, SPEED_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.heading, ANGLE_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.sensordepth, DEPTH_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.altitude, DEPTH_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.roll, ANGLE_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.pitch, ANGLE_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.heave, OFFSET_SCALE))?;
    writer.write_i32::<BigEndian>(scale_to_i32(ping.bathymetry, DEPTH_SCALE))?;

    let pixels = ping.sidescan.oss.len();
    writer.write_u32::<BigEndian>(pixels as u32)?;
    for i in 0..pixels {
        let amplitude = scale_to_i16_or_invalid(ping.sidescan.oss[i], AMPLITUDE_SCALE);
        let offset = scale_to_i16_or_invalid(ping.sidescan.along_track[i], OFFSET_SCALE);
        writer.write_i16::<BigEndian>(amplitude)?;
        writer.write_i16::<BigEndian>(offset)?;
    }
    Ok(())
}

/// One decoded ping record: header fields left as scaled-back floats, and
/// sidescan pixels left as raw `i16` pairs (the caller, not this codec,
/// decides how to treat `INVALID_SS`).
#[derive(Debug, Clone)]
pub struct DecodedPing {
    pub time_fields: [i32; 7],
    pub lon: f64,
    pub lat: f64,
    pub speed: f64,
    pub heading: f64,
    pub sensordepth: f64,
    pub altitude: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heave: f64,
    pub bathymetry: f64,
    pub amplitudes: Vec<i16>,
    pub along_track_offsets: Vec<i16>,
}

pub fn read_ping<R: Read>(reader: &mut R) -> Result<DecodedPing, SondageError> {
    let mut time_fields = [0i32; 7];
    for field in &mut time_fields {
        *field = reader.read_i32::<BigEndian>()?;
    }
    let lon = reader.read_i32::<BigEndian>()? as f64 / LON_LAT_SCALE;
    let lat = reader.read_i32::<BigEndian>()? as f64 / LON_LAT_SCALE;
    let speed = reader.read_i32::<BigEndian>()? as f64 / SPEED_SCALE;
    let heading = reader.read_i32::<BigEndian>()? as f64 / ANGLE_SCALE;
    let sensordepth = reader.read_i32::<BigEndian>()? as f64 / DEPTH_SCALE;
    let altitude = reader.read_i32::<BigEndian>()? as f64 / DEPTH_SCALE;
    let roll = reader.read_i32::<BigEndian>()? as f64 / ANGLE_SCALE;
    let pitch = reader.read_i32::<BigEndian>()? as f64 / ANGLE_SCALE;
    let heave = reader.read_i32::<BigEndian>()? as f64 / OFFSET_SCALE;
    let bathymetry = reader.read_i32::<BigEndian>()? as f64 / DEPTH_SCALE;

    let pixels = reader.read_u32::<BigEndian>()? as usize;
    let mut amplitudes = Vec::with_capacity(pixels);
    let mut along_track_offsets = Vec::with_capacity(pixels);
    for _ in 0..pixels {
        amplitudes.push(reader.read_i16::<BigEndian>()?);
        along_track_offsets.push(reader.read_i16::<BigEndian>()?);
    }

    Ok(DecodedPing {
        time_fields,
        lon,
        lat,
        speed,
        heading,
        sensordepth,
        altitude,
        roll,
        pitch,
        heave,
        bathymetry,
        amplitudes,
        along_track_offsets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidescan::LayoutResult;

    fn sample_ping() -> Ping {
        Ping {
            time: 1_700_000_000.25,
            lon: -122.5,
            lat: 37.75,
            speed: 2.5,
            heading: 90.0,
            sensordepth: 1.2,
            altitude: 50.0,
            roll: -1.5,
            pitch: 0.5,
            heave: 0.1,
            bathymetry: 51.2,
            sidescan: LayoutResult {
                oss: vec![10.0, f64::NAN, 12.0],
                along_track: vec![1.0, f64::NAN, -1.0],
            },
        }
    }

    #[test]
    fn round_trips_a_ping_through_the_binary_codec() {
        let ping = sample_ping();
        let mut buffer = Vec::new();
        write_ping(&mut buffer, &ping).unwrap();

        let mut cursor = &buffer[..];
        let decoded = read_ping(&mut cursor).unwrap();

        assert!((decoded.lon - ping.lon).abs() < 1e-6);
        assert!((decoded.lat - ping.lat).abs() < 1e-6);
        assert!((decoded.speed - ping.speed).abs() < 1e-3);
        assert!((decoded.heading - ping.heading).abs() < 1e-3);
        assert_eq!(decoded.amplitudes.len(), 3);
        assert_eq!(decoded.amplitudes[1], INVALID_SS);
        assert_eq!(decoded.along_track_offsets[1], INVALID_SS);
        assert_eq!(decoded.amplitudes[0], 1000);
    }

    #[test]
    fn seven_field_timestamp_round_trips_a_known_date() {
        // 2023-11-14 22:13:20 UTC, julian day 318.
        let fields = seven_field_timestamp(1_700_000_000.0);
        assert_eq!(fields[0], 2023);
        assert_eq!(fields[1], 318);
        assert_eq!(fields[2], 22);
        assert_eq!(fields[3], 13);
        assert_eq!(fields[4], 20);
    }

    #[test]
    fn consecutive_pings_concatenate_without_framing_ambiguity() {
        let a = sample_ping();
        let mut b = sample_ping();
        b.time += 1.0;
        let mut buffer = Vec::new();
        write_ping(&mut buffer, &a).unwrap();
        write_ping(&mut buffer, &b).unwrap();

        let mut cursor = &buffer[..];
        let first = read_ping(&mut cursor).unwrap();
        let second = read_ping(&mut cursor).unwrap();
        assert!((first.lon - a.lon).abs() < 1e-6);
        assert!((second.lon - b.lon).abs() < 1e-6);
    }
}
