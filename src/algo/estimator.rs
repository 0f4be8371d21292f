// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Numeric estimators driven by the AEC and AWB state machines.
//!
//! The state machines only decide *when* to estimate and how to apply the
//! result. The estimation itself sits behind [`ExposureEstimator`] and
//! [`WhiteBalanceEstimator`] so boards can plug a vendor library in place of
//! the built-in [`RateLimitedExposure`] and [`ProfileWhiteBalance`].

use crate::{
    error::{IspError, Result},
    iq_param::PRECISION,
};
use tracing::trace;

/// Sensor gain (mdB) and exposure time (µs).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExposureSettings {
    pub gain: u32,
    pub exposure: u32,
}

/// Rate limiting of the exposure loop.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ExposureHyperParams {
    /// Gain increment in mdB per unit of luminance error.
    pub gain_increment_coeff: u32,
    /// Errors below this use `gain_low_increment_max`.
    pub gain_low_delta: u32,
    /// Errors at or above this use `gain_high_increment_max`.
    pub gain_high_delta: u32,
    pub gain_low_increment_max: u32,
    pub gain_medium_increment_max: u32,
    pub gain_high_increment_max: u32,
    /// Relative exposure increase per unit of luminance error.
    pub exposure_up_ratio: f32,
    /// Relative exposure decrease per unit of luminance error.
    pub exposure_down_ratio: f32,
    /// Below this luminance the measurement carries no information.
    pub dark_zone_lum_limit: u32,
}

impl Default for ExposureHyperParams {
    fn default() -> Self {
        Self {
            gain_increment_coeff: 100,
            gain_low_delta: 45,
            gain_high_delta: 120,
            gain_low_increment_max: 1500,
            gain_medium_increment_max: 6000,
            gain_high_increment_max: 12000,
            exposure_up_ratio: 0.020,
            exposure_down_ratio: 0.004,
            dark_zone_lum_limit: 5,
        }
    }
}

/// Sensor ranges the estimator must stay within.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SensorLimits {
    pub gain_min: u32,
    pub gain_max: u32,
    pub exposure_min: u32,
    pub exposure_max: u32,
}

/// One exposure estimation request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExposureRequest {
    pub target: u32,
    pub tolerance: u32,
    /// Mains frequency, 0 when anti-flicker is off.
    pub anti_flicker_hz: u32,
    pub current: ExposureSettings,
    pub luminance: u8,
}

pub trait ExposureEstimator: Send {
    /// Called at algorithm init with the sensor ranges.
    fn configure(&mut self, limits: SensorLimits) -> Result<()>;

    /// Compute the next sensor settings. Returning `request.current`
    /// means no change.
    fn estimate(&mut self, request: &ExposureRequest) -> Result<ExposureSettings>;
}

/// Built-in auto exposure: exposure time first, then gain, with the step
/// size bounded by the luminance error.
#[derive(Clone, Debug, Default)]
pub struct RateLimitedExposure {
    pub hyper: ExposureHyperParams,
    limits: SensorLimits,
}

impl RateLimitedExposure {
    pub fn new(hyper: ExposureHyperParams) -> Self {
        Self {
            hyper,
            limits: SensorLimits::default(),
        }
    }

    fn gain_step(&self, delta: u32) -> u32 {
        let h = &self.hyper;
        let max = if delta < h.gain_low_delta {
            h.gain_low_increment_max
        } else if delta < h.gain_high_delta {
            h.gain_medium_increment_max
        } else {
            h.gain_high_increment_max
        };
        (delta * h.gain_increment_coeff).clamp(1, max)
    }

    /// Round an exposure down to a whole number of flicker periods.
    fn flicker_free(&self, exposure: u32, anti_flicker_hz: u32) -> u32 {
        if anti_flicker_hz == 0 {
            return exposure;
        }
        // lights flicker at twice the mains frequency
        let period = 1_000_000 / (2 * anti_flicker_hz);
        if period == 0 || self.limits.exposure_max < period {
            return exposure;
        }
        (exposure / period).max(1) * period
    }
}

impl ExposureEstimator for RateLimitedExposure {
    fn configure(&mut self, limits: SensorLimits) -> Result<()> {
        if limits.gain_min > limits.gain_max || limits.exposure_min > limits.exposure_max {
            return Err(IspError::AlgorithmFailure(format!(
                "invalid sensor limits {:?}",
                limits
            )));
        }
        self.limits = limits;
        Ok(())
    }

    fn estimate(&mut self, request: &ExposureRequest) -> Result<ExposureSettings> {
        let lim = self.limits;
        let current = request.current;
        let luminance = request.luminance as i64;
        let delta = request.target as i64 - luminance;
        if delta.unsigned_abs() <= request.tolerance as u64 {
            return Ok(current);
        }

        let mut next = current;
        let exposure = current.exposure.clamp(lim.exposure_min, lim.exposure_max);
        let gain = current.gain.clamp(lim.gain_min, lim.gain_max);

        if delta > 0 {
            // no usable luminance in the dark zone, step as if fully dark
            let error = if luminance < self.hyper.dark_zone_lum_limit as i64 {
                request.target as i64
            } else {
                delta
            };
            let factor = 1.0 + self.hyper.exposure_up_ratio as f64 * error as f64;
            let wanted = ((exposure.max(1) as f64 * factor).ceil() as u64)
                .min(lim.exposure_max as u64) as u32;
            let wanted = self.flicker_free(wanted, request.anti_flicker_hz);
            if wanted > exposure {
                next.exposure = wanted;
            } else {
                next.gain = gain
                    .saturating_add(self.gain_step(error as u32))
                    .min(lim.gain_max);
            }
        } else {
            let error = delta.unsigned_abs() as u32;
            if gain > lim.gain_min {
                next.gain = gain.saturating_sub(self.gain_step(error)).max(lim.gain_min);
            } else {
                let factor =
                    (1.0 - self.hyper.exposure_down_ratio as f64 * error as f64).max(0.5);
                let wanted = ((exposure as f64 * factor) as u32).max(lim.exposure_min);
                let wanted = self.flicker_free(wanted, request.anti_flicker_hz);
                if wanted < exposure {
                    next.exposure = wanted.max(lim.exposure_min);
                }
            }
        }
        trace!(
            "L {} target {}: gain {} -> {}, exposure {} -> {}",
            luminance,
            request.target,
            current.gain,
            next.gain,
            current.exposure,
            next.exposure
        );
        Ok(next)
    }
}

/// Estimator-side description of a white balance profile.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WbProfile {
    pub color_temp: u32,
    /// CFA gains in R, Gr, Gb, B order, `1.0` is unity.
    pub cfa_gains: [f32; 4],
    pub ccm: [[f32; 3]; 3],
    pub ccm_offsets: [f32; 3],
}

impl WbProfile {
    /// Build from tuning units: gains and coefficients scaled by
    /// [`PRECISION`].
    pub fn from_tuning(color_temp: u32, gains: [u32; 3], coeff: &[[i32; 3]; 3]) -> Self {
        let scale = PRECISION as f32;
        let g = gains.map(|g| g as f32 / scale);
        Self {
            color_temp,
            cfa_gains: [g[0], g[1], g[1], g[2]],
            ccm: coeff.map(|row| row.map(|c| c as f32 / scale)),
            ccm_offsets: [0.0; 3],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WbHyperParams {
    /// Temperature ratio per run below which the estimate moves freely.
    pub speed_p_min: f64,
    /// Largest temperature ratio per run once outside `speed_p_min`.
    pub speed_p_max: f64,
    /// Darkest usable channel value.
    pub gm_tolerance: u32,
    /// Runs a new decision must persist before it is output.
    pub conv_criterion: u32,
}

impl WbHyperParams {
    pub fn for_profiles(count: usize) -> Self {
        Self {
            speed_p_min: 1.35,
            speed_p_max: if count < 4 { 1.8 } else { 2.0 },
            gm_tolerance: 1,
            conv_criterion: 3,
        }
    }
}

/// AWB measurement: sensor-space RGB with ISP gain and black level
/// reversed, and the output-space RGB after colour conversion and inverse
/// gamma.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WbMeasurement {
    pub raw: [f64; 3],
    pub processed: [f64; 3],
}

pub trait WhiteBalanceEstimator: Send {
    /// Register the profiles, sorted by temperature, and the
    /// `profiles.len() - 1` decision thresholds.
    fn init_profiles(
        &mut self,
        profiles: &[WbProfile],
        thresholds: &[f32],
        hyper: WbHyperParams,
    ) -> Result<()>;

    /// Estimate the colour temperature of the scene. The result is always
    /// one of the profile temperatures.
    fn run(&mut self, measurement: &WbMeasurement) -> Result<u32>;
}

/// Built-in white balance: compares the sensor red/blue ratio with the
/// neutral ratio of every profile, interpolates a temperature and snaps it
/// to a profile through the decision thresholds.
#[derive(Clone, Debug, Default)]
pub struct ProfileWhiteBalance {
    profiles: Vec<WbProfile>,
    thresholds: Vec<f32>,
    hyper: Option<WbHyperParams>,
    estimate: Option<f64>,
    output: Option<u32>,
    candidate: Option<(u32, u32)>,
}

impl ProfileWhiteBalance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Red over blue ratio of a neutral patch lit by the profile's light.
    fn neutral_ratio(profile: &WbProfile) -> f64 {
        profile.cfa_gains[3] as f64 / profile.cfa_gains[0] as f64
    }

    fn interpolate(&self, ratio: f64) -> f64 {
        let points: Vec<(f64, f64)> = self
            .profiles
            .iter()
            .map(|p| (Self::neutral_ratio(p).ln(), p.color_temp as f64))
            .collect();
        let x = ratio.ln();
        let (first, last) = (points[0], points[points.len() - 1]);
        // ratio falls with temperature
        if x >= first.0 {
            return first.1;
        }
        if x <= last.0 {
            return last.1;
        }
        for pair in points.windows(2) {
            let (hi, lo) = (pair[0], pair[1]);
            if x <= hi.0 && x >= lo.0 {
                let t = (hi.0 - x) / (hi.0 - lo.0);
                return hi.1 + t * (lo.1 - hi.1);
            }
        }
        last.1
    }

    fn decide(&self, temp: f64) -> u32 {
        self.thresholds
            .iter()
            .position(|t| temp < *t as f64)
            .map(|i| self.profiles[i].color_temp)
            .unwrap_or(self.profiles[self.profiles.len() - 1].color_temp)
    }
}

impl WhiteBalanceEstimator for ProfileWhiteBalance {
    fn init_profiles(
        &mut self,
        profiles: &[WbProfile],
        thresholds: &[f32],
        hyper: WbHyperParams,
    ) -> Result<()> {
        if profiles.is_empty() || thresholds.len() + 1 != profiles.len() {
            return Err(IspError::AlgorithmFailure(format!(
                "{} profiles with {} thresholds",
                profiles.len(),
                thresholds.len()
            )));
        }
        if profiles
            .iter()
            .any(|p| p.cfa_gains[0] <= 0.0 || p.cfa_gains[3] <= 0.0)
        {
            return Err(IspError::AlgorithmFailure("zero profile gain".to_owned()));
        }
        self.profiles = profiles.to_vec();
        self.thresholds = thresholds.to_vec();
        self.hyper = Some(hyper);
        self.estimate = None;
        self.output = None;
        self.candidate = None;
        Ok(())
    }

    fn run(&mut self, measurement: &WbMeasurement) -> Result<u32> {
        let hyper = self
            .hyper
            .ok_or_else(|| IspError::AlgorithmFailure("no profiles".to_owned()))?;
        let [r, g, b] = measurement.raw;
        let floor = hyper.gm_tolerance as f64;
        if r <= floor || g <= floor || b <= floor {
            return self
                .output
                .ok_or_else(|| IspError::AlgorithmFailure("measurement too dark".to_owned()));
        }

        let measured = self.interpolate(r / b);
        let estimate = match self.estimate {
            None => measured,
            Some(previous) => {
                let step = measured / previous;
                if step > hyper.speed_p_min || step < 1.0 / hyper.speed_p_min {
                    measured.clamp(previous / hyper.speed_p_max, previous * hyper.speed_p_max)
                } else {
                    measured
                }
            }
        };
        self.estimate = Some(estimate);
        let decision = self.decide(estimate);

        let output = match self.output {
            None => decision,
            Some(current) if current == decision => {
                self.candidate = None;
                current
            }
            Some(current) => {
                let seen = match self.candidate {
                    Some((temp, count)) if temp == decision => count + 1,
                    _ => 1,
                };
                if seen >= hyper.conv_criterion {
                    self.candidate = None;
                    decision
                } else {
                    self.candidate = Some((decision, seen));
                    current
                }
            }
        };
        trace!(
            "r/b {:.3} -> {:.0}K estimate {:.0}K output {}K",
            r / b,
            measured,
            estimate,
            output
        );
        self.output = Some(output);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SensorLimits {
        SensorLimits {
            gain_min: 0,
            gain_max: 30_000,
            exposure_min: 100,
            exposure_max: 33_000,
        }
    }

    fn request(current: ExposureSettings, luminance: u8) -> ExposureRequest {
        ExposureRequest {
            target: 56,
            tolerance: 10,
            anti_flicker_hz: 0,
            current,
            luminance,
        }
    }

    #[test]
    fn test_exposure_within_tolerance() {
        let mut ae = RateLimitedExposure::default();
        ae.configure(limits()).unwrap();
        let current = ExposureSettings {
            gain: 1000,
            exposure: 5000,
        };
        assert_eq!(ae.estimate(&request(current, 60)).unwrap(), current);
        assert_eq!(ae.estimate(&request(current, 46)).unwrap(), current);
    }

    #[test]
    fn test_exposure_then_gain() {
        let mut ae = RateLimitedExposure::default();
        ae.configure(limits()).unwrap();
        let current = ExposureSettings {
            gain: 0,
            exposure: 1000,
        };
        let next = ae.estimate(&request(current, 20)).unwrap();
        assert_eq!(next.gain, 0);
        assert!(next.exposure > 1000);

        let saturated = ExposureSettings {
            gain: 0,
            exposure: 33_000,
        };
        let next = ae.estimate(&request(saturated, 20)).unwrap();
        assert_eq!(next.exposure, 33_000);
        // 36 * 100 clamped to the low band
        assert_eq!(next.gain, 1500);
    }

    #[test]
    fn test_gain_first_when_too_bright() {
        let mut ae = RateLimitedExposure::default();
        ae.configure(limits()).unwrap();
        let current = ExposureSettings {
            gain: 8000,
            exposure: 20_000,
        };
        let next = ae.estimate(&request(current, 250)).unwrap();
        assert_eq!(next.exposure, 20_000);
        assert_eq!(next.gain, 0);
    }

    #[test]
    fn test_anti_flicker_periods() {
        let mut ae = RateLimitedExposure::default();
        ae.configure(limits()).unwrap();
        let current = ExposureSettings {
            gain: 0,
            exposure: 20_000,
        };
        let mut req = request(current, 20);
        req.anti_flicker_hz = 50;
        // 34400 capped to 33000 then rounded to whole 10 ms periods
        let next = ae.estimate(&req).unwrap();
        assert_eq!(next.exposure, 30_000);
    }

    fn tungsten_to_daylight() -> Vec<WbProfile> {
        vec![
            WbProfile::from_tuning(2800, [140_000_000, 100_000_000, 290_000_000], &[[0; 3]; 3]),
            WbProfile::from_tuning(4000, [180_000_000, 100_000_000, 220_000_000], &[[0; 3]; 3]),
            WbProfile::from_tuning(6500, [230_000_000, 100_000_000, 160_000_000], &[[0; 3]; 3]),
        ]
    }

    #[test]
    fn test_white_balance_snaps_to_profile() {
        let mut wb = ProfileWhiteBalance::new();
        let profiles = tungsten_to_daylight();
        wb.init_profiles(&profiles, &[3100.0, 4625.0], WbHyperParams::for_profiles(3))
            .unwrap();
        // neutral patch under the TL84 reference: r/b = 220/180
        let meas = WbMeasurement {
            raw: [122.0, 100.0, 100.0],
            processed: [100.0; 3],
        };
        assert_eq!(wb.run(&meas).unwrap(), 4000);
        assert_eq!(wb.run(&meas).unwrap(), 4000);
    }

    #[test]
    fn test_white_balance_needs_convergence() {
        let mut wb = ProfileWhiteBalance::new();
        wb.init_profiles(&tungsten_to_daylight(), &[3100.0, 4625.0], WbHyperParams::for_profiles(3))
            .unwrap();
        let tl84 = WbMeasurement {
            raw: [122.0, 100.0, 100.0],
            processed: [100.0; 3],
        };
        let daylight = WbMeasurement {
            raw: [70.0, 100.0, 100.0],
            processed: [100.0; 3],
        };
        assert_eq!(wb.run(&tl84).unwrap(), 4000);
        assert_eq!(wb.run(&daylight).unwrap(), 4000);
        assert_eq!(wb.run(&daylight).unwrap(), 4000);
        assert_eq!(wb.run(&daylight).unwrap(), 6500);
    }

    #[test]
    fn test_white_balance_rejects_mismatched_thresholds() {
        let mut wb = ProfileWhiteBalance::new();
        let err = wb.init_profiles(&tungsten_to_daylight(), &[3100.0], WbHyperParams::for_profiles(3));
        assert!(matches!(err, Err(IspError::AlgorithmFailure(_))));
    }
}
