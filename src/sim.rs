// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Software camera.
//!
//! [`SimCamera`] renders a uniform scene through a simple sensor and pixel
//! pipeline model so the closed loops can run without hardware. The four
//! capability handles share one state; [`SimCamera::advance_frame`] must be
//! called once per frame, before the main pipe VSYNC is handed to the ISP.
//!
//! The sensor response is `luminance * tint * exposure / REFERENCE_EXPOSURE
//! * 10^(gain / 20000)` per component, saturating at 255. Sensor writes
//! become visible `latency` frames later. The "down" statistics see the
//! black level and the ISP gain applied; the colour conversion only shows
//! in dumped frames.

use crate::{
    capability::{
        AppHelpers, BayerPattern, ColorConvRegs, Component, DemosaicRegs, DumpConfig, DumpMeta,
        DumpPipe, FrameDump, FrameFormat, GainReg, HalResult, Pipeline, Sensor, SensorInfo,
        StatChannelConfig, StatMode, StatSource, StatisticsBlock, Window, STAT_CHANNELS,
    },
    device::from_gain_reg,
    error::HalError,
    iq_param::PRECISION,
    stats::luminance,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::trace;

/// Exposure time at which the scene luminance is rendered unchanged.
pub const REFERENCE_EXPOSURE: u32 = 10_000;

/// Illumination of the simulated scene.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Scene {
    /// Sensor output at the reference exposure and minimum gain.
    pub luminance: f64,
    /// Per component response, `[1.0; 3]` for a grey scene.
    pub tint: [f64; 3],
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            luminance: 20.0,
            tint: [1.0; 3],
        }
    }
}

/// Sensor settings as `(gain, exposure)`.
type Settings = (u32, u32);

#[derive(Debug)]
struct SimState {
    info: SensorInfo,
    scene: Scene,
    latency: usize,
    requested: Settings,
    pending: VecDeque<Settings>,
    effective: Settings,
    sensor_writes: usize,
    redundant_writes: usize,
    test_pattern: Option<i32>,

    ready: bool,
    demosaic: Option<DemosaicRegs>,
    stat_removal: Option<(u32, u32)>,
    decimation: u8,
    contrast: Option<[u8; 9]>,
    stat_window: Option<Window>,
    bad_pixel: Option<u8>,
    bad_pixel_rate: u32,
    black_level: Option<[u8; 3]>,
    exposure_gain: Option<[GainReg; 3]>,
    color_conv: Option<ColorConvRegs>,
    color_conv_writes: usize,
    gamma: [bool; 3],

    configured: [Option<StatChannelConfig>; STAT_CHANNELS],
    latched: [Option<StatChannelConfig>; STAT_CHANNELS],
    counters: [u32; STAT_CHANNELS],
    frame: u64,

    previewing: bool,
    dump_size: (u32, u32),
}

impl SimState {
    fn new(info: SensorInfo, scene: Scene, latency: usize) -> Self {
        let initial = (info.gain_min, info.exposure_min);
        Self {
            info,
            scene,
            latency: latency.max(1),
            requested: initial,
            pending: VecDeque::new(),
            effective: initial,
            sensor_writes: 0,
            redundant_writes: 0,
            test_pattern: None,
            ready: true,
            demosaic: None,
            stat_removal: None,
            decimation: 1,
            contrast: None,
            stat_window: None,
            bad_pixel: None,
            bad_pixel_rate: 8,
            black_level: None,
            exposure_gain: None,
            color_conv: None,
            color_conv_writes: 0,
            gamma: [false; 3],
            configured: [None; STAT_CHANNELS],
            latched: [None; STAT_CHANNELS],
            counters: [0; STAT_CHANNELS],
            frame: 0,
            previewing: false,
            dump_size: (160, 120),
        }
    }

    /// Sensor output of each component for the effective settings.
    fn raw(&self) -> [f64; 3] {
        let (gain, exposure) = self.effective;
        let scale = exposure as f64 / REFERENCE_EXPOSURE as f64 * 10f64.powf(gain as f64 / 20_000.0);
        self.scene
            .tint
            .map(|t| (self.scene.luminance * t * scale).clamp(0.0, 255.0))
    }

    /// Demosaiced data after black level and ISP gain, as seen by the
    /// "down" statistics.
    fn demosaiced(&self) -> [f64; 3] {
        let mut rgb = self.raw();
        if let Some(black) = self.black_level {
            for (v, b) in rgb.iter_mut().zip(black) {
                *v = (*v - b as f64).max(0.0);
            }
        }
        if let Some(gains) = self.exposure_gain {
            for (v, g) in rgb.iter_mut().zip(gains) {
                *v *= from_gain_reg(g) as f64 / PRECISION as f64;
            }
        }
        rgb.map(|v| v.clamp(0.0, 255.0))
    }

    /// Pipe output after colour conversion.
    fn processed(&self) -> [f64; 3] {
        let mut rgb = self.demosaiced();
        if let Some(conv) = self.color_conv {
            let input = rgb;
            for (out, (row, offset)) in rgb.iter_mut().zip(conv.coeff.iter().zip(conv.offset)) {
                let acc: f64 = row.iter().zip(input).map(|(c, v)| *c as f64 / 256.0 * v).sum();
                *out = acc + offset as f64;
            }
        }
        rgb.map(|v| v.clamp(0.0, 255.0))
    }

    fn pixels(&self) -> u64 {
        self.stat_window
            .map(|w| w.width as u64 * w.height as u64)
            .unwrap_or(0)
    }

    fn counter(&self, config: StatChannelConfig) -> u32 {
        let (component, values, up) = match config.source {
            StatSource::PreBlackLevel(c) => (c, self.raw(), true),
            StatSource::PostDemosaic(c) => (c, self.demosaiced(), false),
        };
        let rgb = values.map(|v| v.round() as u8);
        let value = match component {
            Component::Red => rgb[0],
            Component::Green => rgb[1],
            Component::Blue => rgb[2],
            Component::Luminance => luminance(rgb[0], rgb[1], rgb[2]),
        };
        let mut pixels = self.pixels();
        match config.mode {
            StatMode::Average => {
                if up {
                    pixels /= if component == Component::Green { 2 } else { 4 };
                }
                (value as u64 * pixels / 256) as u32
            }
            StatMode::Bins(_) => pixels as u32,
        }
    }

    fn bins_counter(&self, channel: usize, config: StatChannelConfig) -> u32 {
        let StatMode::Bins(range) = config.mode else {
            return self.counter(config);
        };
        let lum = self.counter(StatChannelConfig {
            mode: StatMode::Average,
            source: match config.source {
                StatSource::PreBlackLevel(_) => StatSource::PreBlackLevel(Component::Luminance),
                StatSource::PostDemosaic(_) => StatSource::PostDemosaic(Component::Luminance),
            },
        });
        let pixels = self.pixels();
        let value = if pixels == 0 { 0 } else { lum as u64 * 256 / pixels };
        let bin = (value as usize * 12 / 256).min(11);
        if bin == range.first_bin() + channel {
            pixels as u32
        } else {
            0
        }
    }

    fn advance(&mut self) {
        self.frame += 1;
        self.pending.push_back(self.requested);
        while self.pending.len() > self.latency {
            self.pending.pop_front();
        }
        if self.pending.len() == self.latency {
            if let Some(front) = self.pending.front() {
                self.effective = *front;
            }
        }

        for channel in 0..STAT_CHANNELS {
            self.counters[channel] = match self.latched[channel] {
                Some(config) => self.bins_counter(channel, config),
                None => 0,
            };
        }
        self.latched = self.configured;
        trace!(
            "sim frame {} gain {} exposure {} counters {:?}",
            self.frame,
            self.effective.0,
            self.effective.1,
            self.counters
        );
    }
}

/// Shared handle on the simulated camera.
#[derive(Clone, Debug)]
pub struct SimCamera {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new(SimCamera::default_sensor(), Scene::default(), 1)
    }
}

fn lock(state: &Mutex<SimState>) -> HalResult<MutexGuard<'_, SimState>> {
    state
        .lock()
        .map_err(|_| HalError::Failed("simulation state poisoned".to_owned()))
}

impl SimCamera {
    /// `latency` is the number of frames between a sensor write and the
    /// first frame showing it, at least 1.
    pub fn new(info: SensorInfo, scene: Scene, latency: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(info, scene, latency))),
        }
    }

    /// A 1080p RGGB sensor.
    pub fn default_sensor() -> SensorInfo {
        SensorInfo {
            name: "SIM1080".to_owned(),
            bayer_pattern: BayerPattern::Rggb,
            color_depth: 10,
            width: 1920,
            height: 1080,
            gain_min: 0,
            gain_max: 24_000,
            exposure_min: 100,
            exposure_max: 33_000,
        }
    }

    pub fn sensor(&self) -> SimSensor {
        SimSensor(self.clone())
    }

    pub fn pipeline(&self) -> SimPipeline {
        SimPipeline(self.clone())
    }

    pub fn statistics(&self) -> SimStatistics {
        SimStatistics(self.clone())
    }

    pub fn helpers(&self) -> SimHelpers {
        SimHelpers(self.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> HalResult<T> {
        let mut state = lock(&self.state)?;
        Ok(f(&mut state))
    }

    /// Start a new frame: apply due sensor writes and latch the statistic
    /// channel configuration.
    pub fn advance_frame(&self) {
        if let Ok(mut state) = lock(&self.state) {
            state.advance();
        }
    }

    pub fn set_scene(&self, scene: Scene) {
        let _ = self.with(|s| s.scene = scene);
    }

    pub fn set_ready(&self, ready: bool) {
        let _ = self.with(|s| s.ready = ready);
    }

    /// Bad pixels detected per frame at strength 0.
    pub fn set_bad_pixel_rate(&self, rate: u32) {
        let _ = self.with(|s| s.bad_pixel_rate = rate);
    }

    /// Size of the preview and raw dumps. Full size dumps always use the
    /// sensor resolution.
    pub fn set_dump_size(&self, width: u32, height: u32) {
        let _ = self.with(|s| s.dump_size = (width, height));
    }

    /// Gain and exposure the sensor currently outputs.
    pub fn effective_settings(&self) -> (u32, u32) {
        self.with(|s| s.effective).unwrap_or_default()
    }

    /// Number of sensor gain and exposure writes so far.
    pub fn sensor_writes(&self) -> usize {
        self.with(|s| s.sensor_writes).unwrap_or_default()
    }

    /// Number of sensor writes that did not change the setting.
    pub fn redundant_sensor_writes(&self) -> usize {
        self.with(|s| s.redundant_writes).unwrap_or_default()
    }

    /// Number of colour conversion writes so far.
    pub fn color_conv_writes(&self) -> usize {
        self.with(|s| s.color_conv_writes).unwrap_or_default()
    }

    pub fn color_conv(&self) -> Option<ColorConvRegs> {
        self.with(|s| s.color_conv).ok().flatten()
    }

    pub fn exposure_gain(&self) -> Option<[GainReg; 3]> {
        self.with(|s| s.exposure_gain).ok().flatten()
    }

    pub fn is_previewing(&self) -> bool {
        self.with(|s| s.previewing).unwrap_or_default()
    }

    pub fn test_pattern(&self) -> Option<i32> {
        self.with(|s| s.test_pattern).ok().flatten()
    }
}

pub struct SimSensor(SimCamera);

impl Sensor for SimSensor {
    fn info(&self) -> HalResult<SensorInfo> {
        self.0.with(|s| s.info.clone())
    }

    fn gain(&self) -> HalResult<u32> {
        self.0.with(|s| s.requested.0)
    }

    fn set_gain(&mut self, gain: u32) -> HalResult<()> {
        self.0.with(|s| {
            if s.requested.0 == gain {
                s.redundant_writes += 1;
            }
            s.requested.0 = gain;
            s.sensor_writes += 1;
        })
    }

    fn exposure(&self) -> HalResult<u32> {
        self.0.with(|s| s.requested.1)
    }

    fn set_exposure(&mut self, exposure: u32) -> HalResult<()> {
        self.0.with(|s| {
            if s.requested.1 == exposure {
                s.redundant_writes += 1;
            }
            s.requested.1 = exposure;
            s.sensor_writes += 1;
        })
    }

    fn set_test_pattern(&mut self, mode: i32) -> HalResult<()> {
        self.0.with(|s| s.test_pattern = (mode >= 0).then_some(mode))
    }
}

pub struct SimPipeline(SimCamera);

impl Pipeline for SimPipeline {
    fn is_ready(&self) -> bool {
        self.0.with(|s| s.ready).unwrap_or(false)
    }

    fn version(&self) -> HalResult<(u32, u32)> {
        Ok((1, 0))
    }

    fn set_demosaicing(&mut self, regs: Option<DemosaicRegs>) -> HalResult<()> {
        self.0.with(|s| s.demosaic = regs)
    }

    fn set_stat_removal(&mut self, lines: Option<(u32, u32)>) -> HalResult<()> {
        self.0.with(|s| s.stat_removal = lines)
    }

    fn set_decimation(&mut self, factor: u8) -> HalResult<()> {
        self.0.with(|s| s.decimation = factor)
    }

    fn decimation(&self) -> HalResult<u8> {
        self.0.with(|s| s.decimation)
    }

    fn set_contrast(&mut self, regs: Option<[u8; 9]>) -> HalResult<()> {
        self.0.with(|s| s.contrast = regs)
    }

    fn set_stat_window(&mut self, window: Option<Window>) -> HalResult<()> {
        self.0.with(|s| s.stat_window = window)
    }

    fn stat_window(&self) -> HalResult<Option<Window>> {
        self.0.with(|s| s.stat_window)
    }

    fn set_bad_pixel(&mut self, strength: Option<u8>) -> HalResult<()> {
        self.0.with(|s| s.bad_pixel = strength)
    }

    fn bad_pixel(&self) -> HalResult<Option<u8>> {
        self.0.with(|s| s.bad_pixel)
    }

    fn set_black_level(&mut self, levels: Option<[u8; 3]>) -> HalResult<()> {
        self.0.with(|s| s.black_level = levels)
    }

    fn black_level(&self) -> HalResult<Option<[u8; 3]>> {
        self.0.with(|s| s.black_level)
    }

    fn set_exposure_gain(&mut self, regs: Option<[GainReg; 3]>) -> HalResult<()> {
        self.0.with(|s| s.exposure_gain = regs)
    }

    fn exposure_gain(&self) -> HalResult<Option<[GainReg; 3]>> {
        self.0.with(|s| s.exposure_gain)
    }

    fn set_color_conv(&mut self, regs: Option<ColorConvRegs>) -> HalResult<()> {
        self.0.with(|s| {
            s.color_conv = regs;
            s.color_conv_writes += 1;
        })
    }

    fn color_conv(&self) -> HalResult<Option<ColorConvRegs>> {
        self.0.with(|s| s.color_conv)
    }

    fn set_gamma(&mut self, pipe: u8, enable: bool) -> HalResult<()> {
        self.0.with(|s| match s.gamma.get_mut(pipe as usize) {
            Some(slot) => {
                *slot = enable;
                Ok(())
            }
            None => Err(HalError::Failed(format!("no pipe {}", pipe))),
        })?
    }

    fn gamma(&self, pipe: u8) -> HalResult<bool> {
        self.0.with(|s| s.gamma.get(pipe as usize).copied().unwrap_or(false))
    }
}

pub struct SimStatistics(SimCamera);

impl StatisticsBlock for SimStatistics {
    fn configure_channel(&mut self, channel: usize, config: StatChannelConfig) -> HalResult<()> {
        self.0.with(|s| match s.configured.get_mut(channel) {
            Some(slot) => {
                *slot = Some(config);
                Ok(())
            }
            None => Err(HalError::Failed(format!("no channel {}", channel))),
        })?
    }

    fn enable_channel(&mut self, channel: usize) -> HalResult<()> {
        if channel < STAT_CHANNELS {
            Ok(())
        } else {
            Err(HalError::Failed(format!("no channel {}", channel)))
        }
    }

    fn read_counter(&self, channel: usize) -> HalResult<u32> {
        self.0.with(|s| s.counters.get(channel).copied())?
            .ok_or_else(|| HalError::Failed(format!("no channel {}", channel)))
    }

    fn bad_pixel_count(&self) -> HalResult<u32> {
        self.0.with(|s| match s.bad_pixel {
            Some(strength) => s.bad_pixel_rate * (strength as u32 + 1),
            None => 0,
        })
    }
}

/// Preview control and frame dumps.
pub struct SimHelpers(SimCamera);

impl AppHelpers for SimHelpers {
    fn start_preview(&mut self) -> HalResult<()> {
        self.0.with(|s| s.previewing = true)
    }

    fn stop_preview(&mut self) -> HalResult<()> {
        self.0.with(|s| s.previewing = false)
    }

    fn dump_frame(&mut self, pipe: DumpPipe, config: DumpConfig) -> HalResult<FrameDump> {
        self.0.with(|s| {
            let (width, height, format, bpp, pixel) = match (pipe, config) {
                (DumpPipe::Dump, _) => {
                    // green sites dominate the Bayer mosaic
                    let raw = s.raw().map(|v| v as u8);
                    let (w, h) = s.dump_size;
                    (w, h, FrameFormat::Raw8, 1, vec![raw[1]])
                }
                (_, DumpConfig::FullsizeRgb888) => {
                    let rgb = s.processed().map(|v| v as u8);
                    (s.info.width, s.info.height, FrameFormat::Rgb888, 3, rgb.to_vec())
                }
                _ => {
                    let rgb = s.processed().map(|v| v as u8);
                    let (w, h) = s.dump_size;
                    (w, h, FrameFormat::Rgb888, 3, rgb.to_vec())
                }
            };
            let pitch = width * bpp;
            let size = pitch * height;
            let data = pixel.iter().copied().cycle().take(size as usize).collect();
            FrameDump {
                meta: DumpMeta {
                    size,
                    width,
                    height,
                    pitch,
                    format,
                },
                data,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_response() {
        let camera = SimCamera::default();
        let mut sensor = camera.sensor();
        sensor.set_exposure(REFERENCE_EXPOSURE).unwrap();
        camera.advance_frame();
        let state = lock(&camera.state).unwrap();
        assert_eq!(state.raw(), [20.0; 3]);
    }

    #[test]
    fn test_sensor_latency() {
        let camera = SimCamera::new(SimCamera::default_sensor(), Scene::default(), 3);
        let mut sensor = camera.sensor();
        sensor.set_gain(6000).unwrap();
        camera.advance_frame();
        camera.advance_frame();
        assert_eq!(camera.effective_settings().0, 0);
        camera.advance_frame();
        assert_eq!(camera.effective_settings().0, 6000);
    }

    #[test]
    fn test_counters_follow_latched_config() {
        let camera = SimCamera::default();
        let mut pipeline = camera.pipeline();
        let mut stats = camera.statistics();
        pipeline
            .set_stat_window(Some(Window {
                x0: 0,
                y0: 0,
                width: 64,
                height: 64,
            }))
            .unwrap();
        let config = StatChannelConfig {
            mode: StatMode::Average,
            source: StatSource::PostDemosaic(Component::Red),
        };
        stats.configure_channel(0, config).unwrap();
        camera.advance_frame();
        assert_eq!(stats.read_counter(0).unwrap(), 0);
        camera.advance_frame();
        // minimum exposure: 20 * 100 / 10000 rounds to 0
        assert_eq!(stats.read_counter(0).unwrap(), 0);

        camera.set_scene(Scene {
            luminance: 12_800.0,
            tint: [1.0; 3],
        });
        camera.advance_frame();
        // 128 * 4096 / 256
        assert_eq!(stats.read_counter(0).unwrap(), 2048);
    }
}
