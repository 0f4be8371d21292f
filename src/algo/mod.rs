// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Closed-loop image-quality algorithms.
//!
//! Every algorithm is a non-blocking state machine advanced once per
//! background tick by [`AlgoScheduler::process`]. Waiting for statistics is
//! expressed as a state: the algorithm registers with the statistics engine,
//! parks in [`AlgoState::WaitingStat`] and is moved to
//! [`AlgoState::StatReady`] by [`AlgoScheduler::deliver`] once the engine
//! matched its registration.

pub mod aec;
pub mod awb;
pub mod bad_pixel;
pub mod estimator;
pub mod sensor_delay;

use crate::{
    device::Device,
    error::Result,
    iq_param::IqParam,
    stats::{StatClient, StatSnapshot, StatTicket, StatsEngine},
};
use aec::Aec;
use awb::Awb;
use bad_pixel::BadPixelControl;
use sensor_delay::SensorDelayCalibration;
use tracing::{debug, warn};

/// Frames between an ISP block update and the first frame showing it.
pub const ISP_LATENCY: u32 = 2;

/// Identity of an algorithm, also used as statistics client id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AlgoId {
    BadPixel,
    Aec,
    Awb,
    SensorDelay,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AlgoState {
    #[default]
    Init,
    NeedStat,
    WaitingStat,
    StatReady,
}

/// Values of the last algorithm runs, for the application.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IspMeta {
    pub average_l: u8,
    pub exposure_target: u32,
    pub color_temp: u32,
}

/// Everything an algorithm may touch during one step.
pub struct AlgoEnv<'a> {
    pub device: &'a mut Device,
    pub stats: &'a mut StatsEngine,
    pub iq: &'a mut IqParam,
    pub meta: &'a mut IspMeta,
    /// Current main pipe frame id.
    pub frame_id: u32,
}

/// Registration bookkeeping shared by the statistics consumers.
#[derive(Clone, Debug, Default)]
pub(crate) struct StatWait {
    pub state: AlgoState,
    pub ticket: Option<StatTicket>,
    pub stats: StatSnapshot,
}

impl StatWait {
    /// Drop any outstanding registration and go back to init.
    pub fn reset(&mut self, stats: &mut StatsEngine) {
        if let Some(ticket) = self.ticket.take() {
            stats.cancel(ticket);
        }
        self.state = AlgoState::Init;
    }
}

/// The algorithm table.
pub enum Algorithm {
    BadPixel(BadPixelControl),
    Aec(Aec),
    Awb(Awb),
    SensorDelay(SensorDelayCalibration),
}

impl Algorithm {
    pub fn id(&self) -> AlgoId {
        match self {
            Algorithm::BadPixel(_) => AlgoId::BadPixel,
            Algorithm::Aec(_) => AlgoId::Aec,
            Algorithm::Awb(_) => AlgoId::Awb,
            Algorithm::SensorDelay(_) => AlgoId::SensorDelay,
        }
    }

    pub fn state(&self) -> AlgoState {
        match self {
            Algorithm::BadPixel(a) => a.state(),
            Algorithm::Aec(a) => a.state(),
            Algorithm::Awb(a) => a.state(),
            Algorithm::SensorDelay(a) => a.state(),
        }
    }

    fn init(&mut self, env: &mut AlgoEnv) -> Result<()> {
        match self {
            Algorithm::BadPixel(a) => a.init(env),
            Algorithm::Aec(a) => a.init(env),
            Algorithm::Awb(a) => a.init(env),
            Algorithm::SensorDelay(a) => a.init(env),
        }
    }

    fn deinit(&mut self, env: &mut AlgoEnv) -> Result<()> {
        match self {
            Algorithm::BadPixel(a) => a.deinit(env),
            Algorithm::Aec(a) => a.deinit(env),
            Algorithm::Awb(a) => a.deinit(env),
            Algorithm::SensorDelay(a) => a.deinit(env),
        }
    }

    fn process(&mut self, env: &mut AlgoEnv) -> Result<()> {
        match self {
            Algorithm::BadPixel(a) => a.process(env),
            Algorithm::Aec(a) => a.process(env),
            Algorithm::Awb(a) => a.process(env),
            Algorithm::SensorDelay(a) => a.process(env),
        }
    }

    fn on_stats(&mut self, snapshot: StatSnapshot) {
        match self {
            Algorithm::BadPixel(_) => warn!("bad pixel control does not consume statistics"),
            Algorithm::Aec(a) => a.on_stats(snapshot),
            Algorithm::Awb(a) => a.on_stats(snapshot),
            Algorithm::SensorDelay(a) => a.on_stats(snapshot),
        }
    }
}

/// Ordered list of algorithms run by the background process.
pub struct AlgoScheduler {
    algorithms: Vec<Algorithm>,
}

impl Default for AlgoScheduler {
    fn default() -> Self {
        Self::new(Aec::default(), Awb::default())
    }
}

impl AlgoScheduler {
    /// The standard table: bad pixel, AEC, AWB then the sensor delay
    /// calibration.
    pub fn new(aec: Aec, awb: Awb) -> Self {
        Self {
            algorithms: vec![
                Algorithm::BadPixel(BadPixelControl::default()),
                Algorithm::Aec(aec),
                Algorithm::Awb(awb),
                Algorithm::SensorDelay(SensorDelayCalibration::default()),
            ],
        }
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    pub fn init(&mut self, env: &mut AlgoEnv) -> Result<()> {
        for algo in self.algorithms.iter_mut() {
            debug!("init {:?}", algo.id());
            algo.init(env)?;
        }
        Ok(())
    }

    pub fn deinit(&mut self, env: &mut AlgoEnv) -> Result<()> {
        for algo in self.algorithms.iter_mut() {
            algo.deinit(env)?;
            env.stats.cancel_owner(StatClient::Algo(algo.id()));
        }
        Ok(())
    }

    /// Run one step of every algorithm in order. The first failure aborts
    /// the remaining algorithms for this tick.
    pub fn process(&mut self, env: &mut AlgoEnv) -> Result<()> {
        for algo in self.algorithms.iter_mut() {
            if let Err(err) = algo.process(env) {
                debug!("{:?} failed: {}", algo.id(), err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Hand a matched statistics registration to its owner.
    pub fn deliver(&mut self, id: AlgoId, snapshot: StatSnapshot) {
        if let Some(algo) = self.algorithms.iter_mut().find(|a| a.id() == id) {
            algo.on_stats(snapshot);
        }
    }

    pub fn aec(&self) -> Option<&Aec> {
        self.algorithms.iter().find_map(|a| match a {
            Algorithm::Aec(aec) => Some(aec),
            _ => None,
        })
    }

    pub fn awb(&self) -> Option<&Awb> {
        self.algorithms.iter().find_map(|a| match a {
            Algorithm::Awb(awb) => Some(awb),
            _ => None,
        })
    }

    fn awb_mut(&mut self) -> Option<&mut Awb> {
        self.algorithms.iter_mut().find_map(|a| match a {
            Algorithm::Awb(awb) => Some(awb),
            _ => None,
        })
    }

    fn sensor_delay_mut(&mut self) -> Option<&mut SensorDelayCalibration> {
        self.algorithms.iter_mut().find_map(|a| match a {
            Algorithm::SensorDelay(cal) => Some(cal),
            _ => None,
        })
    }

    /// Force AWB to re-read its profiles and re-apply a profile.
    pub fn request_awb_reconfigure(&mut self) {
        if let Some(awb) = self.awb_mut() {
            awb.request_reconfigure();
        }
    }

    /// Arm the one-shot sensor delay measurement.
    pub fn arm_sensor_delay(&mut self) {
        if let Some(cal) = self.sensor_delay_mut() {
            cal.arm();
        }
    }

    pub fn sensor_delay_running(&self) -> bool {
        self.algorithms.iter().any(|a| match a {
            Algorithm::SensorDelay(cal) => cal.is_armed(),
            _ => false,
        })
    }

    /// Measured delay waiting to be reported, if any.
    pub fn take_sensor_delay_report(&mut self) -> Option<u32> {
        self.sensor_delay_mut().and_then(|cal| cal.take_report())
    }
}
