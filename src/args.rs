// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the EdgeFirst ISP demo.
///
/// Runs the ISP control loops against the simulated camera. Arguments can
/// be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-isp --iq-param tuning.json --frames 300 --calibrate-delay
///
/// # Via environment variables
/// export IQ_PARAM=tuning.json
/// export SENSOR_LATENCY=3
/// edgefirst-isp
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IQ parameter file (JSON), built-in defaults when omitted
    #[arg(long, env = "IQ_PARAM")]
    pub iq_param: Option<PathBuf>,

    /// Number of frames to run, 0 runs until interrupted
    #[arg(long, env = "FRAMES", default_value = "300")]
    pub frames: u64,

    /// Simulated frame rate
    #[arg(long, env = "FPS", default_value = "30")]
    pub fps: u32,

    /// Frames between a sensor write and its first visible frame
    #[arg(long, env = "SENSOR_LATENCY", default_value = "1")]
    pub sensor_latency: usize,

    /// Scene luminance at the reference exposure (10 ms, minimum gain)
    #[arg(long, env = "SCENE_LUMINANCE", default_value = "20.0")]
    pub scene_luminance: f64,

    /// Statistic area in sensor pixels (x0 y0 width height), the IQ
    /// parameter area when omitted
    #[arg(long, env = "STAT_AREA", value_delimiter = ' ', num_args = 4)]
    pub stat_area: Option<Vec<u32>>,

    /// Measure the sensor delay at startup
    #[arg(long, env = "CALIBRATE_DELAY")]
    pub calibrate_delay: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["edgefirst-isp"]);
        assert_eq!(args.frames, 300);
        assert_eq!(args.sensor_latency, 1);
        assert!(args.stat_area.is_none());
        assert!(!args.calibrate_delay);
    }

    #[test]
    fn test_stat_area() {
        let args = Args::parse_from(["edgefirst-isp", "--stat-area", "0", "0", "640", "480"]);
        assert_eq!(args.stat_area, Some(vec![0, 0, 640, 480]));
    }
}
