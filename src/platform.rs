//! Platform / lever-arm model (C4).
//!
//! A rigid-body sensor tree rooted at the platform origin. Resolving a
//! target sensor's pose composes every ancestor's attitude and position
//! offset from the root down, in heading-then-pitch-then-roll (Z-Y-X
//! intrinsic) order, the way a multi-sensor survey platform's offset table
//! is composed onto one reference frame.

use crate::geodesy;
use crate::latency::ChannelMask;

/// A sensor-frame position offset: forward, starboard, and down, in metres.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offset3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// An attitude offset applied at a sensor relative to its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttitudeOffset {
    pub heading: f64,
    pub roll: f64,
    pub pitch: f64,
}

/// One mounted sensor in the platform tree.
#[derive(Debug, Clone)]
pub struct Sensor {
    pub parent: Option<usize>,
    pub offset: Offset3,
    pub attitude_offset: Option<AttitudeOffset>,
    pub capability: ChannelMask,
}

/// The ship's decoded pose, before any lever arm is applied.
#[derive(Debug, Clone, Copy)]
pub struct PlatformPose {
    pub lat: f64,
    pub lon: f64,
    pub heading: f64,
    pub roll: f64,
    pub pitch: f64,
    pub sensordepth: f64,
    pub heave: f64,
}

/// A resolved target-sensor pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPose {
    pub lat: f64,
    pub lon: f64,
    /// Draft: sensordepth + heave + the chain's accumulated vertical offset.
    pub depth: f64,
    pub heading: f64,
    pub roll: f64,
    pub pitch: f64,
}

/// A tree of sensors, indexed by position in `sensors`.
#[derive(Default)]
pub struct Platform {
    sensors: Vec<Sensor>,
}

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sensor(
        &mut self,
        parent: Option<usize>,
        offset: Offset3,
        attitude_offset: Option<AttitudeOffset>,
        capability: ChannelMask,
    ) -> usize {
        self.sensors.push(Sensor {
            parent,
            offset,
            attitude_offset,
            capability,
        });
        self.sensors.len() - 1
    }

    pub fn sensor(&self, id: usize) -> &Sensor {
        &self.sensors[id]
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Find the first sensor carrying `capability`, root-to-leaf order.
    pub fn sensor_with_capability(&self, capability: ChannelMask) -> Option<usize> {
        self.sensors
            .iter()
            .position(|s| s.capability.contains(capability))
    }

    fn chain_to_root(&self, target: usize) -> Vec<usize> {
        let mut chain = vec![target];
        let mut current = target;
        while let Some(parent) = self.sensors[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Resolve `target`'s pose given the platform's current pose, composing
    /// every ancestor's offset from the root down to `target`.
    pub fn resolve(&self, pose: &PlatformPose, target: usize) -> TargetPose {
        let chain = self.chain_to_root(target);

        let mut heading = pose.heading;
        let mut roll = pose.roll;
        let mut pitch = pose.pitch;
        let mut north = 0.0;
        let mut east = 0.0;
        let mut down = 0.0;

        for &id in &chain {
            let sensor = &self.sensors[id];
            // Position offsets rotate with the attitude inherited from the
            // parent; this sensor's own delta applies only below it in the
            // chain.
            let (dn, de, dd) = rotate_offset(sensor.offset, heading, pitch, roll);
            north += dn;
            east += de;
            down += dd;
            if let Some(att) = sensor.attitude_offset {
                heading = wrap_heading(heading + att.heading);
                pitch += att.pitch;
                roll += att.roll;
            }
        }

        let (lat, lon) = geodesy::offset_latlon(pose.lat, pose.lon, north, east);
        TargetPose {
            lat,
            lon,
            depth: pose.sensordepth + pose.heave + down,
            heading,
            roll,
            pitch,
        }
    }
}

pub(crate) fn wrap_heading(h: f64) -> f64 {
    h.rem_euclid(360.0)
}

/// Rotate a sensor-frame offset (forward, starboard, down) into the
/// north/east/down frame, composing roll then pitch then heading — the
/// Z-Y-X intrinsic order named heading-then-pitch-then-roll.
fn rotate_offset(offset: Offset3, heading_deg: f64, pitch_deg: f64, roll_deg: f64) -> (f64, f64, f64) {
    let (h, p, r) = (
        heading_deg.to_radians(),
        pitch_deg.to_radians(),
        roll_deg.to_radians(),
    );

    // Roll about the forward axis.
    let x1 = offset.x;
    let y1 = offset.y * r.cos() - offset.z * r.sin();
    let z1 = offset.y * r.sin() + offset.z * r.cos();

    // Pitch about the (rolled) transverse axis.
    let x2 = x1 * p.cos() + z1 * p.sin();
    let y2 = y1;
    let z2 = -x1 * p.sin() + z1 * p.cos();

    // Heading about the vertical axis: forward -> north, starboard -> east.
    let north = x2 * h.cos() - y2 * h.sin();
    let east = x2 * h.sin() + y2 * h.cos();

    (north, east, z2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pose() -> PlatformPose {
        PlatformPose {
            lat: 10.0,
            lon: 20.0,
            heading: 0.0,
            roll: 0.0,
            pitch: 0.0,
            sensordepth: 5.0,
            heave: 0.5,
        }
    }

    #[test]
    fn zero_offset_sensor_matches_the_platform_pose() {
        let mut platform = Platform::new();
        let root = platform.add_sensor(None, Offset3::default(), None, ChannelMask::SURVEY);
        let pose = base_pose();
        let target = platform.resolve(&pose, root);
        assert_eq!(target.lat, pose.lat);
        assert_eq!(target.lon, pose.lon);
        assert_eq!(target.depth, pose.sensordepth + pose.heave);
        assert_eq!(target.heading, pose.heading);
    }

    #[test]
    fn forward_offset_at_heading_90_moves_the_target_east() {
        let mut platform = Platform::new();
        let sensor = platform.add_sensor(
            None,
            Offset3 {
                x: 10.0,
                y: 0.0,
                z: 0.0,
            },
            None,
            ChannelMask::SURVEY,
        );
        let mut pose = base_pose();
        pose.heading = 90.0;
        let target = platform.resolve(&pose, sensor);
        assert!(
            target.lon > pose.lon,
            "expected eastward offset, lon went from {} to {}",
            pose.lon,
            target.lon
        );
        assert!((target.lat - pose.lat).abs() < 1e-6);
    }

    #[test]
    fn downward_offset_adds_to_draft() {
        let mut platform = Platform::new();
        let sensor = platform.add_sensor(
            None,
            Offset3 {
                x: 0.0,
                y: 0.0,
                z: 2.0,
            },
            None,
            ChannelMask::SURVEY,
        );
        let pose = base_pose();
        let target = platform.resolve(&pose, sensor);
        assert!((target.depth - (pose.sensordepth + pose.heave + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn attitude_offsets_compose_additively_down_the_chain() {
        let mut platform = Platform::new();
        let root = platform.add_sensor(
            None,
            Offset3::default(),
            Some(AttitudeOffset {
                heading: 10.0,
                roll: 0.0,
                pitch: 0.0,
            }),
            ChannelMask::SURVEY,
        );
        let child = platform.add_sensor(
            Some(root),
            Offset3::default(),
            Some(AttitudeOffset {
                heading: 5.0,
                roll: 0.0,
                pitch: 0.0,
            }),
            ChannelMask::HEADING,
        );
        let pose = base_pose();
        let target = platform.resolve(&pose, child);
        assert!((target.heading - 15.0).abs() < 1e-9);
    }

    #[test]
    fn sensor_with_capability_finds_the_first_matching_sensor() {
        let mut platform = Platform::new();
        platform.add_sensor(None, Offset3::default(), None, ChannelMask::NAV);
        let heading_sensor =
            platform.add_sensor(None, Offset3::default(), None, ChannelMask::HEADING);
        assert_eq!(
            platform.sensor_with_capability(ChannelMask::HEADING),
            Some(heading_sensor)
        );
        assert!(platform
            .sensor_with_capability(ChannelMask::SOUND_SPEED)
            .is_none());
    }
}
