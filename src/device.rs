// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Hardware services for every image-quality block, the sensor and the
//! optional application helpers.
//!
//! Each setter validates its input against the block limits, converts the
//! tuning units into register encodings and writes the hardware. The IQ
//! parameter cache is never touched here: callers update it only once the
//! hardware write succeeded.

use crate::{
    capability::{
        AppHelpers, BayerPattern, ColorConvRegs, DemosaicRegs, DumpConfig, DumpPipe, FrameDump,
        GainReg, Pipeline, Sensor, SensorInfo, Window,
    },
    error::{Block, IspError, Result},
    iq_param::{
        BadPixel, BlackLevel, ColorConv, Contrast, DecimationFactor, Demosaicing, Gamma, IspGain,
        StatArea, StatRemoval, BAD_PIXEL_STRENGTH_MAX, COLOR_CONV_MAX, COLOR_CONV_OFFSET_MAX,
        CONTRAST_COEFF_MAX, DEMOSAIC_STRENGTH_MAX, ISP_GAIN_MAX, PRECISION,
        STAT_REMOVAL_HEAD_LINES_MAX, STAT_REMOVAL_VALID_LINES_MAX, STAT_WINDOW_MAX,
        STAT_WINDOW_MIN,
    },
};
use tracing::{debug, trace};

/// Widest raw line the pipeline can process.
pub const RAW_MAX_WIDTH: u32 = 2688;

/// Main (ISP) pipe number, used for gamma queries.
pub const MAIN_PIPE: u8 = 1;
/// Ancillary pipe number.
pub const ANCILLARY_PIPE: u8 = 2;

/// Convert a gain factor (`PRECISION` is `x1.0`) to a shift/multiplier
/// register where a multiplier of 128 is `x1.0`.
pub fn to_gain_reg(factor: u32) -> GainReg {
    let mut val = factor as u64 * 128 / PRECISION as u64;
    let mut shift = 0;
    while val >= 256 {
        val /= 2;
        shift += 1;
    }
    GainReg {
        shift,
        multiplier: val as u8,
    }
}

pub fn from_gain_reg(reg: GainReg) -> u32 {
    let val = (1u64 << reg.shift) * reg.multiplier as u64 * PRECISION as u64 / 128;
    val as u32
}

/// Convert a colour conversion coefficient to its 1/256 register format.
pub fn to_ccm_reg(coeff: i32) -> i16 {
    (coeff as i64 * 256 / PRECISION) as i16
}

pub fn from_ccm_reg(reg: i16) -> i32 {
    (reg as i64 * PRECISION / 256) as i32
}

/// Convert a contrast coefficient from percent to the 6-bit register.
pub fn to_contrast_reg(coeff: u32) -> u8 {
    (coeff * 16 / 100) as u8
}

/// Pick the smallest decimation factor that brings `width` under the raw
/// line limit.
pub fn select_decimation(width: u32) -> Result<DecimationFactor> {
    DecimationFactor::ALL
        .into_iter()
        .find(|f| width / f.value() < RAW_MAX_WIDTH)
        .ok_or(IspError::InvalidParameter(Block::Decimation))
}

/// Hardware facade over the sensor, the pixel pipeline and the
/// application helpers.
pub struct Device {
    sensor: Box<dyn Sensor>,
    pipeline: Box<dyn Pipeline>,
    helpers: Box<dyn AppHelpers>,
    sensor_info: SensorInfo,
    decimation: DecimationFactor,
}

impl Device {
    /// Wrap the capabilities and read the sensor description.
    ///
    /// # Errors
    ///
    /// Fails with the sensor info status when the driver cannot describe the
    /// sensor.
    pub fn new(
        sensor: Box<dyn Sensor>,
        pipeline: Box<dyn Pipeline>,
        helpers: Box<dyn AppHelpers>,
    ) -> Result<Self> {
        let sensor_info = sensor
            .info()
            .map_err(|e| IspError::hal(Block::SensorInfo, e))?;
        debug!(
            "sensor {} {}x{} {:?}",
            sensor_info.name, sensor_info.width, sensor_info.height, sensor_info.bayer_pattern
        );
        Ok(Self {
            sensor,
            pipeline,
            helpers,
            sensor_info,
            decimation: DecimationFactor::X1,
        })
    }

    pub fn sensor_info(&self) -> &SensorInfo {
        &self.sensor_info
    }

    /// Check the pipeline is ready to be configured.
    pub fn check_ready(&self) -> Result<()> {
        if self.pipeline.is_ready() {
            Ok(())
        } else {
            Err(IspError::Pipeline(crate::error::PipelineFault::State))
        }
    }

    pub fn version(&self) -> Result<(u32, u32)> {
        self.pipeline
            .version()
            .map_err(|e| IspError::hal(Block::Pipeline, e))
    }

    pub fn set_demosaicing(&mut self, config: &Demosaicing) -> Result<()> {
        let strengths = [config.peak, config.line_v, config.line_h, config.edge];
        if strengths.iter().any(|s| *s > DEMOSAIC_STRENGTH_MAX) {
            return Err(IspError::InvalidParameter(Block::Demosaicing));
        }
        let regs = (config.enable && config.bayer != BayerPattern::Mono).then_some(DemosaicRegs {
            bayer: config.bayer,
            peak: config.peak,
            line_v: config.line_v,
            line_h: config.line_h,
            edge: config.edge,
        });
        trace!("demosaicing {:?}", regs);
        self.pipeline
            .set_demosaicing(regs)
            .map_err(|e| IspError::hal(Block::Demosaicing, e))
    }

    pub fn set_stat_removal(&mut self, config: &StatRemoval) -> Result<()> {
        if config.head_lines > STAT_REMOVAL_HEAD_LINES_MAX
            || config.valid_lines > STAT_REMOVAL_VALID_LINES_MAX
        {
            return Err(IspError::InvalidParameter(Block::StatRemoval));
        }
        let lines = config
            .enable
            .then_some((config.head_lines, config.valid_lines));
        self.pipeline
            .set_stat_removal(lines)
            .map_err(|e| IspError::hal(Block::StatRemoval, e))
    }

    pub fn set_decimation(&mut self, factor: DecimationFactor) -> Result<()> {
        self.pipeline
            .set_decimation(factor as u8)
            .map_err(|e| IspError::hal(Block::Decimation, e))?;
        self.decimation = factor;
        Ok(())
    }

    pub fn decimation(&self) -> DecimationFactor {
        self.decimation
    }

    pub fn set_contrast(&mut self, config: &Contrast) -> Result<()> {
        if config.coeff.iter().any(|c| *c > CONTRAST_COEFF_MAX) {
            return Err(IspError::InvalidParameter(Block::Contrast));
        }
        let regs = config.enable.then(|| config.coeff.map(to_contrast_reg));
        self.pipeline
            .set_contrast(regs)
            .map_err(|e| IspError::hal(Block::Contrast, e))
    }

    /// Program the statistic area, given in sensor coordinates.
    pub fn set_stat_area(&mut self, area: &StatArea) -> Result<()> {
        let info = &self.sensor_info;
        if area.x0 > STAT_WINDOW_MAX
            || area.y0 > STAT_WINDOW_MAX
            || !(STAT_WINDOW_MIN..=STAT_WINDOW_MAX).contains(&area.x_size)
            || !(STAT_WINDOW_MIN..=STAT_WINDOW_MAX).contains(&area.y_size)
            || area.x0 + area.x_size > info.width
            || area.y0 + area.y_size > info.height
        {
            return Err(IspError::InvalidParameter(Block::StatArea));
        }
        let f = self.decimation.value();
        let window = Window {
            x0: area.x0 / f,
            y0: area.y0 / f,
            width: area.x_size / f,
            height: area.y_size / f,
        };
        self.pipeline
            .set_stat_window(Some(window))
            .map_err(|e| IspError::hal(Block::StatArea, e))
    }

    /// Statistic area in sensor coordinates, all zero while disabled.
    pub fn stat_area(&self) -> Result<StatArea> {
        let window = self
            .pipeline
            .stat_window()
            .map_err(|e| IspError::hal(Block::StatArea, e))?;
        let f = self.decimation.value();
        Ok(window
            .map(|w| StatArea {
                x0: w.x0 * f,
                y0: w.y0 * f,
                x_size: w.width * f,
                y_size: w.height * f,
            })
            .unwrap_or_default())
    }

    pub fn set_bad_pixel(&mut self, config: &BadPixel) -> Result<()> {
        if config.strength > BAD_PIXEL_STRENGTH_MAX {
            return Err(IspError::InvalidParameter(Block::BadPixel));
        }
        self.pipeline
            .set_bad_pixel(config.enable.then_some(config.strength))
            .map_err(|e| IspError::hal(Block::BadPixel, e))
    }

    /// Current bad pixel configuration with the given hardware count.
    pub fn bad_pixel(&self, count: u32) -> Result<BadPixel> {
        let strength = self
            .pipeline
            .bad_pixel()
            .map_err(|e| IspError::hal(Block::BadPixel, e))?;
        Ok(BadPixel {
            enable: strength.is_some(),
            strength: strength.unwrap_or(0),
            count,
        })
    }

    pub fn set_black_level(&mut self, config: &BlackLevel) -> Result<()> {
        let levels = config.enable.then_some([config.r, config.g, config.b]);
        self.pipeline
            .set_black_level(levels)
            .map_err(|e| IspError::hal(Block::BlackLevel, e))
    }

    pub fn black_level(&self) -> Result<BlackLevel> {
        let levels = self
            .pipeline
            .black_level()
            .map_err(|e| IspError::hal(Block::BlackLevel, e))?;
        let [r, g, b] = levels.unwrap_or_default();
        Ok(BlackLevel {
            enable: levels.is_some(),
            r,
            g,
            b,
        })
    }

    pub fn set_isp_gain(&mut self, config: &IspGain) -> Result<()> {
        let gains = [config.r, config.g, config.b];
        if gains.iter().any(|g| *g > ISP_GAIN_MAX) {
            return Err(IspError::InvalidParameter(Block::IspGain));
        }
        let regs = config.enable.then(|| gains.map(to_gain_reg));
        trace!("isp gain {:?}", regs);
        self.pipeline
            .set_exposure_gain(regs)
            .map_err(|e| IspError::hal(Block::IspGain, e))
    }

    pub fn isp_gain(&self) -> Result<IspGain> {
        let regs = self
            .pipeline
            .exposure_gain()
            .map_err(|e| IspError::hal(Block::IspGain, e))?;
        let [r, g, b] = regs.unwrap_or_default().map(from_gain_reg);
        Ok(IspGain {
            enable: regs.is_some(),
            r,
            g,
            b,
        })
    }

    pub fn set_color_conv(&mut self, config: &ColorConv) -> Result<()> {
        let coeff_ok = config
            .coeff
            .iter()
            .flatten()
            .all(|c| (-COLOR_CONV_MAX..=COLOR_CONV_MAX).contains(c));
        let offset_ok = config
            .offset
            .iter()
            .all(|o| (-COLOR_CONV_OFFSET_MAX..=COLOR_CONV_OFFSET_MAX).contains(o));
        if !coeff_ok || !offset_ok {
            return Err(IspError::InvalidParameter(Block::ColorConv));
        }
        let regs = config.enable.then(|| ColorConvRegs {
            coeff: config.coeff.map(|row| row.map(to_ccm_reg)),
            offset: config.offset.map(|o| o as i16),
        });
        trace!("color conversion {:?}", regs);
        self.pipeline
            .set_color_conv(regs)
            .map_err(|e| IspError::hal(Block::ColorConv, e))
    }

    pub fn color_conv(&self) -> Result<ColorConv> {
        let regs = self
            .pipeline
            .color_conv()
            .map_err(|e| IspError::hal(Block::ColorConv, e))?;
        let raw = regs.unwrap_or_default();
        Ok(ColorConv {
            enable: regs.is_some(),
            coeff: raw.coeff.map(|row| row.map(from_ccm_reg)),
            offset: raw.offset.map(i32::from),
        })
    }

    pub fn set_gamma(&mut self, config: &Gamma) -> Result<()> {
        self.pipeline
            .set_gamma(MAIN_PIPE, config.enable_pipe1)
            .and_then(|_| self.pipeline.set_gamma(ANCILLARY_PIPE, config.enable_pipe2))
            .map_err(|_| IspError::InvalidParameter(Block::Gamma))
    }

    /// Whether gamma is enabled on `pipe`; pipe 0 never has gamma.
    pub fn gamma_enabled(&self, pipe: u8) -> bool {
        match pipe {
            MAIN_PIPE | ANCILLARY_PIPE => self.pipeline.gamma(pipe).unwrap_or(false),
            _ => false,
        }
    }

    pub fn sensor_gain(&self) -> Result<u32> {
        self.sensor
            .gain()
            .map_err(|e| IspError::hal(Block::SensorGain, e))
    }

    pub fn set_sensor_gain(&mut self, gain: u32) -> Result<()> {
        if gain > self.sensor_info.gain_max {
            return Err(IspError::InvalidParameter(Block::SensorGain));
        }
        trace!("sensor gain {}", gain);
        self.sensor
            .set_gain(gain)
            .map_err(|e| IspError::hal(Block::SensorGain, e))
    }

    pub fn sensor_exposure(&self) -> Result<u32> {
        self.sensor
            .exposure()
            .map_err(|e| IspError::hal(Block::SensorExposure, e))
    }

    pub fn set_sensor_exposure(&mut self, exposure: u32) -> Result<()> {
        if exposure > self.sensor_info.exposure_max {
            return Err(IspError::InvalidParameter(Block::SensorExposure));
        }
        trace!("sensor exposure {}", exposure);
        self.sensor
            .set_exposure(exposure)
            .map_err(|e| IspError::hal(Block::SensorExposure, e))
    }

    pub fn set_test_pattern(&mut self, mode: i32) -> Result<()> {
        self.sensor
            .set_test_pattern(mode)
            .map_err(|e| IspError::hal(Block::SensorTestPattern, e))
    }

    pub fn start_preview(&mut self) -> Result<()> {
        self.helpers
            .start_preview()
            .map_err(|e| IspError::hal(Block::Pipeline, e))
    }

    pub fn stop_preview(&mut self) -> Result<()> {
        self.helpers
            .stop_preview()
            .map_err(|e| IspError::hal(Block::Pipeline, e))
    }

    /// Dump a frame through the application helper. Raw sensor dumps use the
    /// dump pipe, everything else the ancillary pipe.
    pub fn dump_frame(&mut self, config: DumpConfig) -> Result<FrameDump> {
        let pipe = match config {
            DumpConfig::DumpPipeSensor => DumpPipe::Dump,
            DumpConfig::FullsizeRgb888 | DumpConfig::Default => DumpPipe::Ancillary,
        };
        let dump = self
            .helpers
            .dump_frame(pipe, config)
            .map_err(|e| IspError::hal(Block::Pipeline, e))?;
        debug!(
            "dumped {}x{} frame ({} bytes) from {:?}",
            dump.meta.width, dump.meta.height, dump.meta.size, pipe
        );
        Ok(dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_reg() {
        assert_eq!(
            to_gain_reg(100_000_000),
            GainReg {
                shift: 0,
                multiplier: 128
            }
        );
        // x4.0 = 512 / 128 -> 128 << 2
        let reg = to_gain_reg(400_000_000);
        assert_eq!(reg, GainReg { shift: 2, multiplier: 128 });
        assert_eq!(from_gain_reg(reg), 400_000_000);
        assert_eq!(to_gain_reg(ISP_GAIN_MAX).shift, 4);
    }

    #[test]
    fn test_ccm_reg() {
        assert_eq!(to_ccm_reg(100_000_000), 256);
        assert_eq!(to_ccm_reg(-150_000_000), -384);
        assert_eq!(from_ccm_reg(-384), -150_000_000);
    }

    #[test]
    fn test_contrast_reg() {
        assert_eq!(to_contrast_reg(100), 16);
        assert_eq!(to_contrast_reg(CONTRAST_COEFF_MAX), 63);
    }

    #[test]
    fn test_select_decimation() {
        assert_eq!(select_decimation(1920).unwrap(), DecimationFactor::X1);
        assert_eq!(select_decimation(2688).unwrap(), DecimationFactor::X2);
        assert_eq!(select_decimation(5000).unwrap(), DecimationFactor::X2);
        assert_eq!(select_decimation(12000).unwrap(), DecimationFactor::X8);
        assert!(select_decimation(30000).is_err());
    }
}
