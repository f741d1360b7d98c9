//! Swath-sonar survey processing core.
//!
//! Ingests multibeam/sidescan survey files through pluggable format
//! drivers, fuses ancillary navigation and attitude streams onto each
//! survey ping, lays sidescan amplitude out into canonical across-track
//! pixels, and maintains a persistent project graph of files, crossings,
//! and ties that a least-squares inversion can adjust.

pub mod config;
pub mod crossing;
pub mod drivers;
pub mod error;
pub mod geodesy;
pub mod inversion;
pub mod latency;
pub mod pingfile;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod project;
pub mod route;
pub mod sidescan;
pub mod timeseries;
pub mod topo;

pub use error::SondageError;
