//! Driver binary for the survey-processing pipeline.
//!
//! Argument parsing is intentionally minimal: this binary exists to
//! exercise the library's job pipeline end to end, not to be a full
//! operator tool. Two subcommands are supported:
//!
//!   sondage-cli process <config.toml> <input> <output.ping>
//!   sondage-cli invert <project-dir>

use std::fs::File as StdFile;
use std::io::BufWriter;
use std::process::ExitCode;

use sondage_core::config::JobConfig;
use sondage_core::drivers::fixture::FixtureDriver;
use sondage_core::drivers::FormatDriver;
use sondage_core::error::SondageError;
use sondage_core::inversion::{self, NormalEquationsSolver};
use sondage_core::latency::ChannelMask;
use sondage_core::pingfile;
use sondage_core::pipeline::{self, ExternalSeries, PingSynthesizer, RangeTableParams};
use sondage_core::platform::Platform;
use sondage_core::progress::{CancelToken, LoggingSink};
use sondage_core::project;
use sondage_core::sidescan::SidescanConfig;

fn run() -> Result<(), SondageError> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("process") => process(&args[2..]),
        Some("invert") => invert(&args[2..]),
        _ => Err(SondageError::Usage {
            message: "usage: sondage-cli process <config.toml> <input> <output.ping> \
                      | sondage-cli invert <project-dir>"
                .into(),
        }),
    }
}

fn process(args: &[String]) -> Result<(), SondageError> {
    let [config_path, input_path, output_path] = args else {
        return Err(SondageError::Usage {
            message: "process requires <config.toml> <input> <output.ping>".into(),
        });
    };

    let config_text = std::fs::read_to_string(config_path)?;
    let config = JobConfig::from_toml_str(&config_text)?;

    let cancel = CancelToken::new();
    let sink = LoggingSink;

    let mut driver = FixtureDriver::default();
    driver.open(input_path, None)?;
    let mut store = pipeline::harvest_pass1(&mut driver, &config.sources, &cancel, &sink)?;

    let latency_model = config
        .latency
        .to_model_inline()
        .unwrap_or(sondage_core::latency::LatencyModel::Constant(0.0));
    pipeline::apply_latency_and_filter(
        &mut store,
        &latency_model,
        config.latency_mask.to_mask(),
        config.filter.clone().into(),
        config.filter_mask.to_mask(),
    )?;

    // A single-sensor platform with zero lever arm stands in for a real
    // mbmakeplatform-derived rig until a `PlatformConfig::FromFile` loader
    // is wired up.
    let mut platform = Platform::new();
    platform.add_sensor(None, Default::default(), None, ChannelMask::ALL);

    let mut driver2 = FixtureDriver::default();
    driver2.open(input_path, None)?;

    let synthesizer = PingSynthesizer {
        store: &store,
        platform: &platform,
        target_sensor: config.target_sensor,
        altitude_mode: config.altitude.clone().into(),
        range_table: RangeTableParams {
            angle_min: -75.0,
            angle_max: 75.0,
            angle_count: 151,
            max_range: 500.0,
            ray_step: 0.5,
        },
        topo_grid: None,
        sidescan_config: SidescanConfig {
            pixels: 512,
            channel_swap: config.channel_swap,
            swath: config.swath.clone().into(),
            gain: config.gain.clone().into(),
            interpolation: config.interpolation,
        },
        capabilities: driver2.capabilities(),
    };

    let external = ExternalSeries::default();
    let out_file = StdFile::create(output_path)?;
    let mut writer = BufWriter::new(out_file);
    let mut emitted = 0u64;

    let count = pipeline::run_pass2(
        &mut driver2,
        &synthesizer,
        &external,
        None,
        &cancel,
        &sink,
        |ping, _new_line| {
            pingfile::write_ping(&mut writer, ping)?;
            emitted += 1;
            Ok(())
        },
    )?;

    log::info!("wrote {emitted} pings ({count} survey records processed) to {output_path}");
    Ok(())
}

fn invert(args: &[String]) -> Result<(), SondageError> {
    let [project_dir] = args else {
        return Err(SondageError::Usage {
            message: "invert requires <project-dir>".into(),
        });
    };

    let mut proj = project::format::load(std::path::Path::new(project_dir))?;
    let solver = NormalEquationsSolver::default();
    inversion::invert(&mut proj, &solver)?;
    project::format::save(&proj, std::path::Path::new(project_dir))?;

    log::info!(
        "inversion complete: {} crossings, {} ties, status now {:?}",
        proj.num_crossings(),
        proj.iter_ties().count(),
        proj.inversion_status
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error}");
            ExitCode::from(error.exit_code() as u8)
        }
    }
}
