//! Route and time-list file parsers (§6.3).
//!
//! Produces [`Waypoint`](crate::pipeline::Waypoint) lists consumable by
//! [`LineSegmenter`](crate::pipeline::LineSegmenter), parsed the same
//! line-oriented, whitespace-separated way `project::format` reads its own
//! on-disk text format.

use crate::error::SondageError;
use crate::pipeline::Waypoint;

/// Default entry radius, in meters, for a route waypoint whose line omits
/// one (structured routes always carry their own; raw routes do not).
const DEFAULT_ROUTE_RADIUS_M: f64 = 50.0;

fn parse_field<T: std::str::FromStr>(token: &str, line_no: usize) -> Result<T, SondageError> {
    token.parse().map_err(|_| SondageError::InconsistentProject {
        message: format!("line {line_no}: cannot parse field {token:?}"),
    })
}

/// Parse a time-list file: lines `idx wpt lon lat heading time`. `idx` and
/// `wpt` are positional bookkeeping columns from the original tool and are
/// not needed once the list is loaded.
pub fn parse_time_list(text: &str) -> Result<Vec<Waypoint>, SondageError> {
    let mut waypoints = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(SondageError::InconsistentProject {
                message: format!("line {}: expected 6 fields, found {}", line_no + 1, fields.len()),
            });
        }
        let lon = parse_field::<f64>(fields[2], line_no + 1)?;
        let lat = parse_field::<f64>(fields[3], line_no + 1)?;
        let time = parse_field::<f64>(fields[5], line_no + 1)?;
        waypoints.push(Waypoint {
            time: Some(time),
            lon,
            lat,
            radius: DEFAULT_ROUTE_RADIUS_M,
        });
    }
    Ok(waypoints)
}

/// Whether a route file is "raw" (lon/lat pairs with no waypoint metadata)
/// or "structured" (lon/lat/depth/type/heading, with an optional per-line
/// radius), signaled by the `## Route File Version` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    Raw,
    Structured,
}

fn classify_header(text: &str) -> RouteKind {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("## Route File Version") {
            return RouteKind::Structured;
        }
        break;
    }
    RouteKind::Raw
}

/// Parse a route file. Structured routes carry `lon lat depth
/// waypoint_type heading`; raw routes carry just `lon lat`. Both produce
/// waypoints gated on [`LineSegmentMode::Route`](crate::pipeline::LineSegmentMode::Route)'s
/// entry-radius trigger, never on time.
pub fn parse_route(text: &str) -> Result<Vec<Waypoint>, SondageError> {
    let kind = classify_header(text);
    let mut waypoints = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match kind {
            RouteKind::Raw => {
                if fields.len() != 2 {
                    return Err(SondageError::InconsistentProject {
                        message: format!(
                            "line {}: raw route expects 2 fields, found {}",
                            line_no + 1,
                            fields.len()
                        ),
                    });
                }
                let lon = parse_field::<f64>(fields[0], line_no + 1)?;
                let lat = parse_field::<f64>(fields[1], line_no + 1)?;
                waypoints.push(Waypoint {
                    time: None,
                    lon,
                    lat,
                    radius: DEFAULT_ROUTE_RADIUS_M,
                });
            }
            RouteKind::Structured => {
                if fields.len() != 5 {
                    return Err(SondageError::InconsistentProject {
                        message: format!(
                            "line {}: structured route expects 5 fields, found {}",
                            line_no + 1,
                            fields.len()
                        ),
                    });
                }
                let lon = parse_field::<f64>(fields[0], line_no + 1)?;
                let lat = parse_field::<f64>(fields[1], line_no + 1)?;
                waypoints.push(Waypoint {
                    time: None,
                    lon,
                    lat,
                    radius: DEFAULT_ROUTE_RADIUS_M,
                });
            }
        }
    }
    Ok(waypoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_time_list_with_comments_and_blank_lines() {
        let text = "# comment\n\n0 0 -122.5 37.75 90.0 1700000000.0\n1 1 -122.4 37.76 95.0 1700000100.0\n";
        let waypoints = parse_time_list(text).unwrap();
        assert_eq!(waypoints.len(), 2);
        assert_eq!(waypoints[0].time, Some(1700000000.0));
        assert!((waypoints[1].lon + 122.4).abs() < 1e-9);
    }

    #[test]
    fn time_list_rejects_a_malformed_line() {
        let text = "0 0 -122.5 37.75\n";
        assert!(parse_time_list(text).is_err());
    }

    #[test]
    fn parses_a_raw_route_as_lon_lat_pairs() {
        let text = "-122.5 37.75\n-122.4 37.76\n";
        let waypoints = parse_route(text).unwrap();
        assert_eq!(waypoints.len(), 2);
        assert!(waypoints[0].time.is_none());
    }

    #[test]
    fn parses_a_structured_route_header_and_fields() {
        let text = "## Route File Version 1\n-122.5 37.75 50.0 1 90.0\n";
        let waypoints = parse_route(text).unwrap();
        assert_eq!(waypoints.len(), 1);
        assert!((waypoints[0].lat - 37.75).abs() < 1e-9);
    }
}
