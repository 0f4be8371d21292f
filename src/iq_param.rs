// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Image-quality tuning parameters.
//!
//! [`IqParam`] is the single in-memory cache of every tunable. It is seeded
//! once when the ISP context is built, either from the built-in defaults or
//! from a JSON blob, and then kept in sync with the hardware by the tuning
//! protocol and the algorithms.
//!
//! ## Units
//!
//! - ISP gains and colour conversion coefficients use a precision factor of
//!   [`PRECISION`]: `100_000_000` is `x1.0`.
//! - Contrast coefficients use `100` for `x1.0`.
//! - Sensor gain is in mdB, exposure in microseconds.

use crate::{
    capability::BayerPattern,
    error::{Block, IspError, Result},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

/// Fixed-point precision of ISP gains and colour conversion coefficients.
pub const PRECISION: i64 = 100_000_000;

/// Maximum number of white balance reference profiles.
pub const AWB_MAX_PROFILES: usize = 5;

/// Maximum length of a profile identifier on the wire.
pub const PROFILE_ID_LEN: usize = 32;

pub const DEMOSAIC_STRENGTH_MAX: u8 = 7;
pub const STAT_REMOVAL_HEAD_LINES_MAX: u32 = 7;
pub const STAT_REMOVAL_VALID_LINES_MAX: u32 = 4094;
pub const CONTRAST_COEFF_MAX: u32 = 394;
pub const BAD_PIXEL_STRENGTH_MAX: u8 = 7;
pub const ISP_GAIN_MAX: u32 = 1_600_000_000;
pub const COLOR_CONV_MAX: i32 = 399_000_000;
pub const COLOR_CONV_OFFSET_MAX: i32 = 1023;
pub const STAT_WINDOW_MIN: u32 = 4;
pub const STAT_WINDOW_MAX: u32 = 4094;

/// Average luminance of a well exposed frame before gamma
/// (`(56 / 255) ^ (1 / 2.2) * 255 = 128`).
pub const IDEAL_EXPOSURE_TARGET: u32 = 56;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demosaicing {
    pub enable: bool,
    pub bayer: BayerPattern,
    pub peak: u8,
    pub line_v: u8,
    pub line_h: u8,
    pub edge: u8,
}

impl Default for Demosaicing {
    fn default() -> Self {
        Self {
            enable: true,
            bayer: BayerPattern::Rggb,
            peak: 2,
            line_v: 4,
            line_h: 4,
            edge: 6,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRemoval {
    pub enable: bool,
    pub head_lines: u32,
    pub valid_lines: u32,
}

/// Horizontal and vertical decimation factor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DecimationFactor {
    #[default]
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
}

impl DecimationFactor {
    pub const ALL: [DecimationFactor; 4] = [
        DecimationFactor::X1,
        DecimationFactor::X2,
        DecimationFactor::X4,
        DecimationFactor::X8,
    ];

    pub fn value(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for DecimationFactor {
    type Error = IspError;

    fn try_from(value: u32) -> Result<Self> {
        DecimationFactor::ALL
            .into_iter()
            .find(|f| f.value() == value)
            .ok_or(IspError::InvalidParameter(Block::Decimation))
    }
}

/// Luminance amplification at LUM_0, LUM_32, ..., LUM_256.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    pub enable: bool,
    pub coeff: [u32; 9],
}

impl Default for Contrast {
    fn default() -> Self {
        Self {
            enable: false,
            coeff: [100; 9],
        }
    }
}

/// Statistic area in sensor coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatArea {
    pub x0: u32,
    pub y0: u32,
    pub x_size: u32,
    pub y_size: u32,
}

impl StatArea {
    pub fn is_empty(&self) -> bool {
        self.x_size == 0 || self.y_size == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadPixelAlgo {
    pub enable: bool,
    /// Target number of detected bad pixels per frame.
    pub threshold: u32,
}

impl Default for BadPixelAlgo {
    fn default() -> Self {
        Self {
            enable: false,
            threshold: 20,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadPixel {
    pub enable: bool,
    pub strength: u8,
    /// Reported bad pixel count, read-only.
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackLevel {
    pub enable: bool,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AecAlgo {
    pub enable: bool,
    /// Exposure compensation in half-EV steps, -4 ..= 4.
    pub exposure_compensation: i32,
    /// Target average luminance, derived from the compensation.
    pub exposure_target: u32,
    /// Accepted distance from the target before adjusting.
    pub tolerance: u32,
    /// Mains frequency in Hz for flicker-free exposures, 0 to disable.
    pub anti_flicker_hz: u32,
}

impl Default for AecAlgo {
    fn default() -> Self {
        Self {
            enable: true,
            exposure_compensation: 0,
            exposure_target: IDEAL_EXPOSURE_TARGET,
            tolerance: 10,
            anti_flicker_hz: 0,
        }
    }
}

/// A calibrated white balance reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwbProfile {
    pub id: String,
    /// Reference colour temperature in Kelvin.
    pub color_temp: u32,
    pub gain_r: u32,
    pub gain_g: u32,
    pub gain_b: u32,
    pub coeff: [[i32; 3]; 3],
    #[serde(default)]
    pub offset: [i32; 3],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwbAlgo {
    pub enable: bool,
    /// Profiles ordered by increasing colour temperature.
    pub profiles: Vec<AwbProfile>,
}

impl AwbAlgo {
    pub fn profile(&self, color_temp: u32) -> Option<(usize, &AwbProfile)> {
        self.profiles
            .iter()
            .enumerate()
            .find(|(_, p)| p.color_temp == color_temp)
    }

    /// Reference temperatures in profile order, zero padded.
    pub fn reference_temps(&self) -> [u32; AWB_MAX_PROFILES] {
        let mut temps = [0; AWB_MAX_PROFILES];
        for (slot, profile) in temps.iter_mut().zip(&self.profiles) {
            *slot = profile.color_temp;
        }
        temps
    }
}

impl Default for AwbAlgo {
    fn default() -> Self {
        Self {
            enable: true,
            profiles: vec![
                AwbProfile {
                    id: "A".to_owned(),
                    color_temp: 2800,
                    gain_r: 140_000_000,
                    gain_g: 100_000_000,
                    gain_b: 290_000_000,
                    coeff: [
                        [180_000_000, -60_000_000, -20_000_000],
                        [-40_000_000, 160_000_000, -20_000_000],
                        [-10_000_000, -90_000_000, 200_000_000],
                    ],
                    offset: [0; 3],
                },
                AwbProfile {
                    id: "TL84".to_owned(),
                    color_temp: 4000,
                    gain_r: 180_000_000,
                    gain_g: 100_000_000,
                    gain_b: 220_000_000,
                    coeff: [
                        [170_000_000, -50_000_000, -20_000_000],
                        [-30_000_000, 150_000_000, -20_000_000],
                        [0, -60_000_000, 160_000_000],
                    ],
                    offset: [0; 3],
                },
                AwbProfile {
                    id: "D65".to_owned(),
                    color_temp: 6500,
                    gain_r: 230_000_000,
                    gain_g: 100_000_000,
                    gain_b: 160_000_000,
                    coeff: [
                        [160_000_000, -50_000_000, -10_000_000],
                        [-20_000_000, 140_000_000, -20_000_000],
                        [0, -50_000_000, 150_000_000],
                    ],
                    offset: [0; 3],
                },
            ],
        }
    }
}

/// Static ISP gain (exposure block) per component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IspGain {
    pub enable: bool,
    pub r: u32,
    pub g: u32,
    pub b: u32,
}

impl Default for IspGain {
    fn default() -> Self {
        Self {
            enable: false,
            r: PRECISION as u32,
            g: PRECISION as u32,
            b: PRECISION as u32,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorConv {
    pub enable: bool,
    pub coeff: [[i32; 3]; 3],
    #[serde(default)]
    pub offset: [i32; 3],
}

impl Default for ColorConv {
    fn default() -> Self {
        let one = PRECISION as i32;
        Self {
            enable: false,
            coeff: [[one, 0, 0], [0, one, 0], [0, 0, one]],
            offset: [0; 3],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gamma {
    pub enable_pipe1: bool,
    pub enable_pipe2: bool,
}

impl Default for Gamma {
    fn default() -> Self {
        Self {
            enable_pipe1: true,
            enable_pipe2: true,
        }
    }
}

/// Sensor pipeline delay in frames, as measured by the calibration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDelay {
    pub delay: u32,
}

impl Default for SensorDelay {
    fn default() -> Self {
        Self { delay: 1 }
    }
}

/// The tunable image-quality parameter set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IqParam {
    pub stat_removal: StatRemoval,
    pub demosaicing: Demosaicing,
    pub contrast: Contrast,
    pub stat_area_static: StatArea,
    /// Static sensor gain in mdB, applied at start when AEC is disabled.
    pub sensor_gain_static: u32,
    /// Static sensor exposure in microseconds.
    pub sensor_exposure_static: u32,
    pub bad_pixel_algo: BadPixelAlgo,
    pub bad_pixel_static: BadPixel,
    pub black_level_static: BlackLevel,
    pub aec_algo: AecAlgo,
    pub awb_algo: AwbAlgo,
    pub isp_gain_static: IspGain,
    pub color_conv_static: ColorConv,
    pub gamma: Gamma,
    pub sensor_delay: SensorDelay,
}

impl IqParam {
    /// Parse and validate a JSON tuning blob. Missing sections take their
    /// default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let param: IqParam = serde_json::from_str(json)?;
        param.validate()?;
        Ok(param)
    }

    /// Load a JSON tuning blob from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading IQ params from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Range checks applied to a freshly loaded blob.
    ///
    /// # Errors
    ///
    /// Returns [`IspError::InvalidParameter`] for [`Block::IqParam`] on the
    /// first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        let invalid = Err(IspError::InvalidParameter(Block::IqParam));

        let d = &self.demosaicing;
        if [d.peak, d.line_v, d.line_h, d.edge]
            .iter()
            .any(|s| *s > DEMOSAIC_STRENGTH_MAX)
        {
            return invalid;
        }
        if self.stat_removal.head_lines > STAT_REMOVAL_HEAD_LINES_MAX
            || self.stat_removal.valid_lines > STAT_REMOVAL_VALID_LINES_MAX
        {
            return invalid;
        }
        if self.contrast.coeff.iter().any(|c| *c > CONTRAST_COEFF_MAX) {
            return invalid;
        }
        if self.bad_pixel_static.strength > BAD_PIXEL_STRENGTH_MAX {
            return invalid;
        }
        if !(-4..=4).contains(&self.aec_algo.exposure_compensation) {
            return invalid;
        }
        if self.awb_algo.profiles.len() > AWB_MAX_PROFILES {
            return invalid;
        }
        for profile in &self.awb_algo.profiles {
            if profile.color_temp == 0
                || profile.id.len() >= PROFILE_ID_LEN
                || [profile.gain_r, profile.gain_g, profile.gain_b]
                    .iter()
                    .any(|g| *g > ISP_GAIN_MAX)
                || !coeff_in_range(&profile.coeff)
            {
                return invalid;
            }
        }
        if !self
            .awb_algo
            .profiles
            .windows(2)
            .all(|w| w[0].color_temp < w[1].color_temp)
        {
            return invalid;
        }
        let gain = &self.isp_gain_static;
        if [gain.r, gain.g, gain.b].iter().any(|g| *g > ISP_GAIN_MAX) {
            return invalid;
        }
        if !coeff_in_range(&self.color_conv_static.coeff) {
            return invalid;
        }
        Ok(())
    }
}

fn coeff_in_range(coeff: &[[i32; 3]; 3]) -> bool {
    coeff
        .iter()
        .flatten()
        .all(|c| (-COLOR_CONV_MAX..=COLOR_CONV_MAX).contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let param = IqParam::default();
        assert!(param.validate().is_ok());
        assert_eq!(param.sensor_delay.delay, 1);
        assert_eq!(param.awb_algo.reference_temps(), [2800, 4000, 6500, 0, 0]);
    }

    #[test]
    fn test_partial_json() {
        let param = IqParam::from_json(r#"{ "aec_algo": { "enable": false, "exposure_compensation": 2, "exposure_target": 112, "tolerance": 8, "anti_flicker_hz": 50 } }"#).unwrap();
        assert!(!param.aec_algo.enable);
        assert_eq!(param.aec_algo.anti_flicker_hz, 50);
        assert_eq!(param.demosaicing, Demosaicing::default());
    }

    #[test]
    fn test_too_many_profiles() {
        let mut param = IqParam::default();
        let profile = param.awb_algo.profiles[0].clone();
        param.awb_algo.profiles = (0..6)
            .map(|i| AwbProfile {
                color_temp: 2000 + i * 1000,
                ..profile.clone()
            })
            .collect();
        let err = param.validate().unwrap_err();
        assert_eq!(err.status() as u8, 100);
    }

    #[test]
    fn test_json_round_trip() {
        let param = IqParam::default();
        let json = param.to_json().unwrap();
        assert_eq!(IqParam::from_json(&json).unwrap(), param);
    }

    #[test]
    fn test_decimation_factor() {
        assert_eq!(DecimationFactor::try_from(4).unwrap(), DecimationFactor::X4);
        assert!(DecimationFactor::try_from(3).is_err());
    }
}
