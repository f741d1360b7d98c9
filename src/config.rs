//! Job configuration (§6.4): a serde-(de)serializable mirror of every
//! option the pipeline accepts, kept separate from the runtime types in
//! `latency`/`sidescan`/`drivers` so this module's only job is parsing a
//! TOML file into plain data; `pipeline` converts it into the runtime enums.

use serde::{Deserialize, Serialize};

use crate::drivers::{FormatId, RecordTag};
use crate::error::SondageError;
use crate::latency::{ChannelMask, FilterModel, LatencyModel};
use crate::sidescan::{AltitudeMode, GainMode, SwathMode};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChannelMaskConfig {
    #[serde(default)]
    pub nav: bool,
    #[serde(default)]
    pub depth: bool,
    #[serde(default)]
    pub altitude: bool,
    #[serde(default)]
    pub heading: bool,
    #[serde(default)]
    pub attitude: bool,
    #[serde(default)]
    pub sound_speed: bool,
    #[serde(default)]
    pub survey: bool,
}

impl ChannelMaskConfig {
    pub fn to_mask(self) -> ChannelMask {
        let mut mask = ChannelMask(0);
        if self.nav {
            mask = mask.union(ChannelMask::NAV);
        }
        if self.depth {
            mask = mask.union(ChannelMask::DEPTH);
        }
        if self.altitude {
            mask = mask.union(ChannelMask::ALTITUDE);
        }
        if self.heading {
            mask = mask.union(ChannelMask::HEADING);
        }
        if self.attitude {
            mask = mask.union(ChannelMask::ATTITUDE);
        }
        if self.sound_speed {
            mask = mask.union(ChannelMask::SOUND_SPEED);
        }
        if self.survey {
            mask = mask.union(ChannelMask::SURVEY);
        }
        mask
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AltitudeConfig {
    Existing,
    BottomPick { threshold: f64, blanking: f64 },
    TopoGrid,
}

impl From<AltitudeConfig> for AltitudeMode {
    fn from(config: AltitudeConfig) -> Self {
        match config {
            AltitudeConfig::Existing => AltitudeMode::UseExisting,
            AltitudeConfig::BottomPick { threshold, blanking } => {
                AltitudeMode::BottomPick { threshold, blanking }
            }
            AltitudeConfig::TopoGrid => AltitudeMode::TopoGrid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SwathConfig {
    Variable,
    Constant { width: f64 },
}

impl From<SwathConfig> for SwathMode {
    fn from(config: SwathConfig) -> Self {
        match config {
            SwathConfig::Variable => SwathMode::Variable,
            SwathConfig::Constant { width } => SwathMode::Constant(width),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GainConfig {
    Off,
    Tvg { gain: f64 },
}

impl From<GainConfig> for GainMode {
    fn from(config: GainConfig) -> Self {
        match config {
            GainConfig::Off => GainMode::Off,
            GainConfig::Tvg { gain } => GainMode::Tvg(gain),
        }
    }
}

/// Which record tag an ancillary channel should be harvested from, when its
/// source is an asynchronous record on the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncKind {
    Nav,
    Depth,
    Heading,
    Attitude,
    Altitude,
    SoundSpeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelSourceConfig {
    InRecord,
    AsyncRecord { record: AsyncKind },
    External { path: String, format_id: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSources {
    #[serde(default = "default_in_record")]
    pub nav: ChannelSourceConfig,
    #[serde(default = "default_in_record")]
    pub depth: ChannelSourceConfig,
    #[serde(default = "default_in_record")]
    pub heading: ChannelSourceConfig,
    #[serde(default = "default_in_record")]
    pub altitude: ChannelSourceConfig,
    #[serde(default = "default_in_record")]
    pub attitude: ChannelSourceConfig,
    #[serde(default = "default_in_record")]
    pub soundspeed: ChannelSourceConfig,
}

fn default_in_record() -> ChannelSourceConfig {
    ChannelSourceConfig::InRecord
}

impl Default for ChannelSources {
    fn default() -> Self {
        Self {
            nav: ChannelSourceConfig::InRecord,
            depth: ChannelSourceConfig::InRecord,
            heading: ChannelSourceConfig::InRecord,
            altitude: ChannelSourceConfig::InRecord,
            attitude: ChannelSourceConfig::InRecord,
            soundspeed: ChannelSourceConfig::InRecord,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatencyConfig {
    None,
    Constant { delta: f64 },
    Tabulated { path: String },
}

impl LatencyConfig {
    /// Resolve to a runtime [`LatencyModel`]. `Tabulated` requires the
    /// caller to have already loaded and parsed the table file; this method
    /// only handles the variants that need no I/O.
    pub fn to_model_inline(&self) -> Option<LatencyModel> {
        match self {
            LatencyConfig::None => Some(LatencyModel::Constant(0.0)),
            LatencyConfig::Constant { delta } => Some(LatencyModel::Constant(*delta)),
            LatencyConfig::Tabulated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterConfig {
    None,
    Boxcar { window: f64 },
}

impl From<FilterConfig> for FilterModel {
    fn from(config: FilterConfig) -> Self {
        match config {
            FilterConfig::None => FilterModel::None,
            FilterConfig::Boxcar { window } => FilterModel::Boxcar { window },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineModeConfig {
    Off,
    TimeList { path: String },
    Route { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformConfig {
    None,
    FromFile { path: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSourceConfig {
    Sidescan,
    HighFreq,
    LowFreq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub altitude: AltitudeConfig,
    #[serde(default)]
    pub channel_swap: bool,
    pub swath: SwathConfig,
    pub gain: GainConfig,
    #[serde(default)]
    pub interpolation: usize,
    #[serde(default)]
    pub sources: ChannelSources,
    pub latency: LatencyConfig,
    #[serde(default = "default_latency_mask")]
    pub latency_mask: ChannelMaskConfig,
    pub filter: FilterConfig,
    #[serde(default = "default_latency_mask")]
    pub filter_mask: ChannelMaskConfig,
    #[serde(default = "default_line_mode")]
    pub line_mode: LineModeConfig,
    #[serde(default = "default_platform")]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub target_sensor: usize,
    pub output_source: OutputSourceConfig,
}

fn default_latency_mask() -> ChannelMaskConfig {
    ChannelMaskConfig::default()
}

fn default_line_mode() -> LineModeConfig {
    LineModeConfig::Off
}

fn default_platform() -> PlatformConfig {
    PlatformConfig::None
}

impl JobConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, SondageError> {
        let config: JobConfig = toml::from_str(text)?;
        Ok(config)
    }
}

impl ChannelSourceConfig {
    pub fn format_id(&self) -> Option<FormatId> {
        match self {
            ChannelSourceConfig::External { format_id, .. } => Some(FormatId(*format_id)),
            _ => None,
        }
    }

    /// Whether this channel is configured to harvest from an asynchronous
    /// record of the given kind during pass 1. `AsyncRecord` harvests when
    /// its configured kind matches; `External` never harvests, since it
    /// reads a caller-supplied series instead. `InRecord` defers to the
    /// driver's own declared `driver_source`: a driver that reports this
    /// channel lives on a distinct record tag (not `RecordTag::Survey`) is
    /// harvested from that tag even under the default `InRecord` config,
    /// since the survey record's own field would otherwise silently go
    /// unpopulated. Only a driver whose capability genuinely embeds the
    /// channel in the survey record itself (`RecordTag::Survey`) leaves
    /// `InRecord` unharvested.
    pub fn harvests_from(&self, kind: AsyncKind, driver_source: RecordTag) -> bool {
        match self {
            ChannelSourceConfig::AsyncRecord { record } => *record == kind,
            ChannelSourceConfig::InRecord => driver_source != RecordTag::Survey,
            ChannelSourceConfig::External { .. } => false,
        }
    }
}
