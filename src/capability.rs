// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capability interfaces consumed by the ISP control core.
//!
//! The core never touches a sensor or the pixel pipeline directly. Board
//! support code provides implementations of these traits when building an
//! [`IspContext`](crate::context::IspContext); [`SimCamera`](crate::sim::SimCamera)
//! provides a software implementation used by the demo binary and the tests.
//!
//! All values crossing these traits are hardware-level: register encodings
//! for the pixel pipeline, mdB and microseconds for the sensor.

use crate::error::HalError;
use serde::{Deserialize, Serialize};

/// Result type returned by every capability operation.
pub type HalResult<T> = std::result::Result<T, HalError>;

/// Number of statistic extraction channels of the hardware block.
pub const STAT_CHANNELS: usize = 3;

/// Colour filter array layout of the sensor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum BayerPattern {
    #[default]
    Rggb = 0,
    Grbg = 1,
    Gbrg = 2,
    Bggr = 3,
    Mono = 4,
}

impl TryFrom<u8> for BayerPattern {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BayerPattern::Rggb),
            1 => Ok(BayerPattern::Grbg),
            2 => Ok(BayerPattern::Gbrg),
            3 => Ok(BayerPattern::Bggr),
            4 => Ok(BayerPattern::Mono),
            other => Err(other),
        }
    }
}

/// Static description of the connected sensor, read once at init.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    pub bayer_pattern: BayerPattern,
    pub color_depth: u8,
    pub width: u32,
    pub height: u32,
    /// Minimum gain in mdB.
    pub gain_min: u32,
    /// Maximum gain in mdB.
    pub gain_max: u32,
    /// Minimum exposure time in microseconds.
    pub exposure_min: u32,
    /// Maximum exposure time in microseconds.
    pub exposure_max: u32,
}

/// Camera sensor driver.
pub trait Sensor: Send {
    fn info(&self) -> HalResult<SensorInfo>;

    /// Current analog gain in mdB.
    fn gain(&self) -> HalResult<u32>;

    fn set_gain(&mut self, gain: u32) -> HalResult<()>;

    /// Current exposure time in microseconds.
    fn exposure(&self) -> HalResult<u32>;

    fn set_exposure(&mut self, exposure: u32) -> HalResult<()>;

    /// Select a test pattern. Optional; sensors without the feature keep the
    /// default implementation.
    fn set_test_pattern(&mut self, _mode: i32) -> HalResult<()> {
        Err(HalError::Unsupported)
    }
}

/// Colour component sampled by a statistic channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Red,
    Green,
    Blue,
    Luminance,
}

/// Where in the pipeline a statistic channel samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatSource {
    /// Raw Bayer data before the black level correction ("up").
    PreBlackLevel(Component),
    /// RGB data after demosaicing ("down").
    PostDemosaic(Component),
}

/// Group of three histogram bins reported by a channel in bins mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinRange {
    /// Bins 0 to 2.
    Lower,
    /// Bins 3 to 5.
    LowMid,
    /// Bins 6 to 8.
    UpMid,
    /// Bins 9 to 11.
    Upper,
}

impl BinRange {
    pub const ALL: [BinRange; 4] = [
        BinRange::Lower,
        BinRange::LowMid,
        BinRange::UpMid,
        BinRange::Upper,
    ];

    /// Index of the first histogram bin covered by this range.
    pub fn first_bin(self) -> usize {
        self as usize * STAT_CHANNELS
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatMode {
    Average,
    /// In bins mode the channel index selects the bin within the range.
    Bins(BinRange),
}

/// Configuration of one statistic extraction channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatChannelConfig {
    pub mode: StatMode,
    pub source: StatSource,
}

/// Hardware statistics extraction block.
///
/// Owned exclusively by the statistics engine.
pub trait StatisticsBlock: Send {
    fn configure_channel(&mut self, channel: usize, config: StatChannelConfig) -> HalResult<()>;

    fn enable_channel(&mut self, channel: usize) -> HalResult<()>;

    /// Accumulated counter of `channel` for the last completed frame.
    fn read_counter(&self, channel: usize) -> HalResult<u32>;

    /// Number of bad pixels detected in the last frame.
    fn bad_pixel_count(&self) -> HalResult<u32>;
}

/// Demosaicing filter registers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DemosaicRegs {
    pub bayer: BayerPattern,
    pub peak: u8,
    pub line_v: u8,
    pub line_h: u8,
    pub edge: u8,
}

/// Statistic window in pipeline coordinates (after decimation).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Window {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
}

/// Exposure (ISP gain) register of one component: `multiplier / 128 << shift`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GainReg {
    pub shift: u8,
    pub multiplier: u8,
}

/// Colour conversion registers, coefficients in 1/256 units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ColorConvRegs {
    pub coeff: [[i16; 3]; 3],
    pub offset: [i16; 3],
}

/// Pixel pipeline image-quality blocks.
///
/// Setters take `None` to disable a block; getters return `None` while the
/// block is disabled.
pub trait Pipeline: Send {
    fn is_ready(&self) -> bool;

    /// Hardware revision as `(major, minor)`.
    fn version(&self) -> HalResult<(u32, u32)>;

    fn set_demosaicing(&mut self, regs: Option<DemosaicRegs>) -> HalResult<()>;

    fn set_stat_removal(&mut self, lines: Option<(u32, u32)>) -> HalResult<()>;

    fn set_decimation(&mut self, factor: u8) -> HalResult<()>;

    fn decimation(&self) -> HalResult<u8>;

    /// Luminance amplification registers for LUM_0 .. LUM_256.
    fn set_contrast(&mut self, regs: Option<[u8; 9]>) -> HalResult<()>;

    fn set_stat_window(&mut self, window: Option<Window>) -> HalResult<()>;

    fn stat_window(&self) -> HalResult<Option<Window>>;

    fn set_bad_pixel(&mut self, strength: Option<u8>) -> HalResult<()>;

    fn bad_pixel(&self) -> HalResult<Option<u8>>;

    fn set_black_level(&mut self, levels: Option<[u8; 3]>) -> HalResult<()>;

    fn black_level(&self) -> HalResult<Option<[u8; 3]>>;

    fn set_exposure_gain(&mut self, regs: Option<[GainReg; 3]>) -> HalResult<()>;

    fn exposure_gain(&self) -> HalResult<Option<[GainReg; 3]>>;

    fn set_color_conv(&mut self, regs: Option<ColorConvRegs>) -> HalResult<()>;

    fn color_conv(&self) -> HalResult<Option<ColorConvRegs>>;

    fn set_gamma(&mut self, pipe: u8, enable: bool) -> HalResult<()>;

    fn gamma(&self, pipe: u8) -> HalResult<bool>;
}

/// Pipe used to dump a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpPipe {
    Dump = 0,
    Ancillary = 2,
}

/// Frame dump configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpConfig {
    /// Dump with the current pipe configuration.
    Default = 0,
    /// Full size RGB888, no downsizing.
    FullsizeRgb888 = 1,
    /// Raw sensor data from the dump pipe.
    DumpPipeSensor = 2,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameFormat {
    #[default]
    Rgb888 = 0,
    Raw8 = 1,
    Raw10 = 2,
    Raw12 = 3,
    Raw14 = 4,
}

impl TryFrom<u8> for FrameFormat {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameFormat::Rgb888),
            1 => Ok(FrameFormat::Raw8),
            2 => Ok(FrameFormat::Raw10),
            3 => Ok(FrameFormat::Raw12),
            4 => Ok(FrameFormat::Raw14),
            other => Err(other),
        }
    }
}

/// Dumped frame description.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpMeta {
    /// Buffer size in bytes.
    pub size: u32,
    pub width: u32,
    pub height: u32,
    /// Line pitch in bytes.
    pub pitch: u32,
    pub format: FrameFormat,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameDump {
    pub meta: DumpMeta,
    pub data: Vec<u8>,
}

/// Optional application services outside the ISP itself.
pub trait AppHelpers: Send {
    fn start_preview(&mut self) -> HalResult<()> {
        Err(HalError::Unsupported)
    }

    fn stop_preview(&mut self) -> HalResult<()> {
        Err(HalError::Unsupported)
    }

    fn dump_frame(&mut self, _pipe: DumpPipe, _config: DumpConfig) -> HalResult<FrameDump> {
        Err(HalError::Unsupported)
    }
}

/// Helpers for hosts that provide none of the optional services.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoAppHelpers;

impl AppHelpers for NoAppHelpers {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_range_index() {
        let first: Vec<usize> = BinRange::ALL.iter().map(|r| r.first_bin()).collect();
        assert_eq!(first, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_optional_helpers_unsupported() {
        let mut helpers = NoAppHelpers;
        assert_eq!(helpers.start_preview(), Err(HalError::Unsupported));
        assert_eq!(
            helpers.dump_frame(DumpPipe::Ancillary, DumpConfig::Default),
            Err(HalError::Unsupported)
        );
    }

    #[test]
    fn test_bayer_from_u8() {
        assert_eq!(BayerPattern::try_from(4), Ok(BayerPattern::Mono));
        assert_eq!(BayerPattern::try_from(9), Err(9));
    }
}
