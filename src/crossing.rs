//! Crossing detector (C9).
//!
//! Scans a project's files for section pairs whose bounding boxes
//! intersect, scores each pair's along-track overlap, and classifies
//! whether the tracklines actually cross. Ported from
//! `mbnavadjust_callbacks.c`'s crossing/tie bookkeeping, generalized from
//! its raw-pointer section pairs to the `(file_id, section_id)` index pairs
//! used throughout `project`.

use crate::geodesy;
use crate::project::{BoundingBox, Crossing, CrossingStatus, File, SectionRef, TrueCrossing};

/// One section's nav track, reduced to what the detector needs: a
/// bounding box and an ordered list of `(lon, lat)` points (the section's
/// snav trajectory).
pub struct SectionTrack<'a> {
    pub section_ref: SectionRef,
    pub bbox: &'a BoundingBox,
    pub points: Vec<(f64, f64)>,
}

fn section_tracks(files: &[File]) -> Vec<SectionTrack> {
    files
        .iter()
        .flat_map(|file| {
            file.sections.iter().map(move |section| SectionTrack {
                section_ref: SectionRef {
                    file_id: file.id,
                    section_id: section.id,
                },
                bbox: &section.bbox,
                points: section.snav.iter().map(|s| (s.lon, s.lat)).collect(),
            })
        })
        .collect()
}

/// Two sections are eligible for a crossing if they belong to different
/// files, or are non-adjacent sections of the same file (mirrors
/// `Crossing::validate`'s invariant in `project`).
fn eligible(a: &SectionTrack, b: &SectionTrack) -> bool {
    if a.section_ref.file_id != b.section_ref.file_id {
        return true;
    }
    a.section_ref.section_id.abs_diff(b.section_ref.section_id) > 1
}

/// Fraction, in percent, of `a`'s along-track pings whose plan-view circle
/// of radius `swath_width / 2` intersects any ping circle of `b` of the
/// same radius — i.e. whose centres fall within the sum of the two radii,
/// `swath_width`.
fn overlap_fraction(a: &[(f64, f64)], b: &[(f64, f64)], swath_width: f64) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let radius_sum = swath_width;
    let mut hits = 0usize;
    for &(alon, alat) in a {
        let touches = b.iter().any(|&(blon, blat)| {
            geodesy::haversine_distance_m(alat, alon, blat, blon) <= radius_sum
        });
        if touches {
            hits += 1;
        }
    }
    100.0 * hits as f64 / a.len() as f64
}

/// Signed area (twice the area, unnormalized) of the triangle `(o, p, q)`;
/// the sign tells which side of line `o->p` the point `q` falls on.
fn signed_area(o: (f64, f64), p: (f64, f64), q: (f64, f64)) -> f64 {
    (p.0 - o.0) * (q.1 - o.1) - (p.1 - o.1) * (q.0 - o.0)
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), p4: (f64, f64)) -> bool {
    let d1 = signed_area(p3, p4, p1);
    let d2 = signed_area(p3, p4, p2);
    let d3 = signed_area(p1, p2, p3);
    let d4 = signed_area(p1, p2, p4);
    (d1 > 0.0) != (d2 > 0.0) && (d3 > 0.0) != (d4 > 0.0)
}

/// Whether the two tracks actually cross: any consecutive-segment pair from
/// `a` intersects any consecutive-segment pair from `b`.
fn tracks_intersect(a: &[(f64, f64)], b: &[(f64, f64)]) -> bool {
    if a.len() < 2 || b.len() < 2 {
        return false;
    }
    for pair_a in a.windows(2) {
        for pair_b in b.windows(2) {
            if segments_intersect(pair_a[0], pair_a[1], pair_b[0], pair_b[1]) {
                return true;
            }
        }
    }
    false
}

/// Detect every eligible intersecting section pair across `files`, scoring
/// overlap against ping circles of radius `swath_width / 2`.
pub fn detect_crossings(files: &[File], swath_width: f64) -> Vec<Crossing> {
    let tracks = section_tracks(files);
    let mut crossings = Vec::new();

    for i in 0..tracks.len() {
        for j in (i + 1)..tracks.len() {
            let (a, b) = (&tracks[i], &tracks[j]);
            if !eligible(a, b) {
                continue;
            }
            if !a.bbox.intersects(b.bbox) {
                continue;
            }
            let overlap = overlap_fraction(&a.points, &b.points, swath_width);
            let true_crossing = if tracks_intersect(&a.points, &b.points) {
                TrueCrossing::TrackIntersecting
            } else {
                TrueCrossing::BboxOnly
            };
            crossings.push(Crossing {
                section_a: a.section_ref,
                section_b: b.section_ref,
                overlap,
                true_crossing,
                status: CrossingStatus::Unset,
                ties: Vec::new(),
            });
        }
    }
    crossings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{FileStats, FileStatus, Section, Snav};

    fn section_with_track(id: u32, points: &[(f64, f64)]) -> Section {
        let mut bbox = BoundingBox::empty();
        for &(lon, lat) in points {
            bbox.expand(lon, lat);
        }
        Section {
            id,
            begin_time: id as f64,
            end_time: id as f64 + 1.0,
            start_index: 0,
            end_index: points.len() as u64,
            bbox,
            snav: points
                .iter()
                .enumerate()
                .map(|(i, &(lon, lat))| Snav {
                    time: id as f64 + i as f64 * 0.1,
                    lon,
                    lat,
                    x_correction: 0.0,
                    y_correction: 0.0,
                    z_correction: 0.0,
                })
                .collect(),
            contours_up_to_date: true,
        }
    }

    fn file_with_sections(id: u32, sections: Vec<Section>) -> File {
        File {
            id,
            path: format!("file-{id}.dat"),
            format_id: 1,
            heading_bias: 0.0,
            roll_bias: 0.0,
            status: FileStatus::Free,
            sections,
            stats: FileStats::default(),
        }
    }

    #[test]
    fn perpendicular_tracks_across_two_files_produce_one_true_crossing() {
        // File 0 runs east-west through (0,0); file 1 runs north-south
        // through the same point. Degrees are small enough that lon/lat
        // behave like a local planar frame for this test.
        let north_south = section_with_track(0, &[(0.0, -0.01), (0.0, 0.01)]);
        let east_west = section_with_track(0, &[(-0.01, 0.0), (0.01, 0.0)]);
        let files = vec![
            file_with_sections(0, vec![north_south]),
            file_with_sections(1, vec![east_west]),
        ];

        let crossings = detect_crossings(&files, 50.0);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].true_crossing, TrueCrossing::TrackIntersecting);
        assert!(crossings[0].overlap > 0.0 && crossings[0].overlap <= 100.0);
    }

    #[test]
    fn non_intersecting_bounding_boxes_produce_no_crossing() {
        let a = section_with_track(0, &[(0.0, 0.0), (1.0, 1.0)]);
        let b = section_with_track(0, &[(50.0, 50.0), (51.0, 51.0)]);
        let files = vec![file_with_sections(0, vec![a]), file_with_sections(1, vec![b])];
        assert!(detect_crossings(&files, 50.0).is_empty());
    }

    #[test]
    fn adjacent_sections_of_the_same_file_are_not_eligible() {
        let a = section_with_track(0, &[(0.0, 0.0), (0.0, 0.01)]);
        let b = section_with_track(1, &[(0.0, 0.01), (0.0, 0.02)]);
        let files = vec![file_with_sections(0, vec![a, b])];
        assert!(detect_crossings(&files, 50.0).is_empty());
    }

    #[test]
    fn overlapping_parallel_tracks_score_partial_overlap_without_a_true_crossing() {
        let a = section_with_track(0, &[(0.0, 0.0), (0.0, 0.01), (0.0, 0.02)]);
        let b = section_with_track(0, &[(0.0001, 0.0), (0.0001, 0.01), (0.0001, 0.02)]);
        let files = vec![file_with_sections(0, vec![a]), file_with_sections(1, vec![b])];
        let crossings = detect_crossings(&files, 5000.0);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].true_crossing, TrueCrossing::BboxOnly);
        assert!(crossings[0].overlap > 0.0);
    }
}
