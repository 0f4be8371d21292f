// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Statistics engine.
//!
//! The hardware statistics block has three extraction channels. They are
//! time-multiplexed over a fixed cycle of ten stages: the averages and the
//! four bin triplets of the "up" location (raw Bayer data, before black
//! level) followed by the same for the "down" location (after demosaicing).
//! Stages whose statistics nobody requested are skipped.
//!
//! A stage configured on tick `t` is read back on tick `t + LATENCY`: one
//! frame for the shadow registers to latch and one frame for the hardware to
//! accumulate. The engine keeps the issued stages in a small ring indexed by
//! the tick count.
//!
//! Completed per-location samples are published to [`StatSnapshot`] `last`
//! only when the location's cycle ends. Clients register with
//! [`StatsEngine::get_next`] and are matched by
//! [`StatsEngine::process_callbacks`] once a cycle starting at or after their
//! target frame has been published.

use crate::{
    algo::AlgoId,
    capability::{BinRange, Component, StatChannelConfig, StatMode, StatSource, StatisticsBlock,
        STAT_CHANNELS},
    error::{Block, IspError, Result},
    iq_param::StatArea,
};
use tracing::{debug, trace, warn};

/// Frames between a stage configuration and its readout.
pub const LATENCY: usize = 2;

/// Number of stages of a full cycle.
pub const CYCLE_LEN: usize = 10;

/// Maximum number of outstanding registrations.
pub const MAX_CLIENTS: usize = 5;

/// Frames the request-all override stays active, three full cycles.
pub const REQUEST_ALL_FRAMES: u32 = 3 * CYCLE_LEN as u32;

/// Pipeline location of a statistic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatLocation {
    Up = 1,
    Down = 2,
    Both = 3,
}

impl StatLocation {
    fn includes_up(self) -> bool {
        self as u8 & StatLocation::Up as u8 != 0
    }

    fn includes_down(self) -> bool {
        self as u8 & StatLocation::Down as u8 != 0
    }
}

/// Requested statistic kinds, as a bit mask.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StatType(u8);

impl StatType {
    pub const NONE: StatType = StatType(0);
    pub const AVG: StatType = StatType(1);
    pub const BINS: StatType = StatType(2);
    pub const AVG_AND_BINS: StatType = StatType(3);
    /// Temporary request for every statistic, used by the tuning tool. It
    /// forces an exhaustive cycle for [`REQUEST_ALL_FRAMES`] frames.
    pub const ALL: StatType = StatType(4);

    pub fn contains(self, other: StatType) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for StatType {
    type Output = StatType;

    fn bitor(self, rhs: StatType) -> StatType {
        StatType(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StatType {
    fn bitor_assign(&mut self, rhs: StatType) {
        self.0 |= rhs.0;
    }
}

/// One stage of the statistics cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    UpAvg = 0,
    UpBins0To2,
    UpBins3To5,
    UpBins6To8,
    UpBins9To11,
    DownAvg,
    DownBins0To2,
    DownBins3To5,
    DownBins6To8,
    DownBins9To11,
}

impl Stage {
    pub const ALL: [Stage; CYCLE_LEN] = [
        Stage::UpAvg,
        Stage::UpBins0To2,
        Stage::UpBins3To5,
        Stage::UpBins6To8,
        Stage::UpBins9To11,
        Stage::DownAvg,
        Stage::DownBins0To2,
        Stage::DownBins3To5,
        Stage::DownBins6To8,
        Stage::DownBins9To11,
    ];

    fn succ(self) -> Stage {
        Stage::ALL[(self as usize + 1) % CYCLE_LEN]
    }

    pub fn location(self) -> StatLocation {
        if (self as usize) < Stage::DownAvg as usize {
            StatLocation::Up
        } else {
            StatLocation::Down
        }
    }

    /// Bin range read by a bins stage, `None` for an average stage.
    pub fn bins(self) -> Option<BinRange> {
        match self {
            Stage::UpAvg | Stage::DownAvg => None,
            _ => Some(BinRange::ALL[self as usize % 5 - 1]),
        }
    }

    /// Hardware configuration of `channel` for this stage.
    pub fn channel_config(self, channel: usize) -> StatChannelConfig {
        let up = self.location() == StatLocation::Up;
        let source = |component| {
            if up {
                StatSource::PreBlackLevel(component)
            } else {
                StatSource::PostDemosaic(component)
            }
        };
        match self.bins() {
            None => StatChannelConfig {
                mode: StatMode::Average,
                source: source(RGB[channel]),
            },
            Some(range) => StatChannelConfig {
                mode: StatMode::Bins(range),
                source: source(Component::Luminance),
            },
        }
    }
}

const RGB: [Component; STAT_CHANNELS] = [Component::Red, Component::Green, Component::Blue];

/// Averages and luminance histogram of one location.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatSample {
    pub average_r: u8,
    pub average_g: u8,
    pub average_b: u8,
    pub average_l: u8,
    pub histogram: [u32; 12],
}

/// Statistics of both locations with the frame range of their cycle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub up: StatSample,
    pub down: StatSample,
    pub up_start: Option<u32>,
    pub up_end: Option<u32>,
    pub down_start: Option<u32>,
    pub down_end: Option<u32>,
}

/// Geometry needed to turn accumulators into averages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatGeometry {
    pub area: StatArea,
    pub decimation: u32,
    /// Monochrome sensor or demosaicing disabled.
    pub mono: bool,
}

impl Default for StatGeometry {
    fn default() -> Self {
        Self {
            area: StatArea::default(),
            decimation: 1,
            mono: false,
        }
    }
}

/// Convert a raw accumulator to a 0..255 average, rounding to nearest.
pub fn average(accu: u32, geometry: &StatGeometry, location: StatLocation, component: Component) -> u8 {
    let f = geometry.decimation.max(1) as u64;
    let mut pixels = geometry.area.x_size as u64 * geometry.area.y_size as u64 / (f * f);
    if location == StatLocation::Up {
        // Bayer: green is sampled twice as densely as red and blue
        pixels /= if component == Component::Green { 2 } else { 4 };
    }
    if pixels == 0 {
        return 0;
    }
    ((accu as u64 * 256 + pixels / 2) / pixels).min(u8::MAX as u64) as u8
}

/// BT.601 luminance.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Luminance of a monochrome sensor, where R, G and B carry partial sums.
/// The sum saturates at 255 rather than wrapping.
pub fn luminance_mono(r: u8, g: u8, b: u8) -> u8 {
    r.saturating_add(g).saturating_add(b)
}

/// Whether frame `frame` is at or after `target`, across a counter wrap.
fn reached(frame: u32, target: u32) -> bool {
    frame.wrapping_sub(target) as i32 >= 0
}

/// Owner of a registration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatClient {
    Algo(AlgoId),
    /// The remote tuning tool.
    Tool,
}

/// Handle on a registration, used to cancel it. A ticket whose
/// registration already fired or was cancelled is inert.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatTicket {
    slot: usize,
    generation: u32,
}

#[derive(Copy, Clone, Debug)]
struct Registration {
    client: StatClient,
    location: StatLocation,
    target: u32,
    generation: u32,
}

/// A matched registration returned by [`StatsEngine::process_callbacks`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub client: StatClient,
    pub location: StatLocation,
    pub ticket: StatTicket,
    pub snapshot: StatSnapshot,
}

#[derive(Copy, Clone, Debug)]
struct Issued {
    stage: Stage,
    tick: u64,
}

/// Time-multiplexed driver of the hardware statistics block.
pub struct StatsEngine {
    block: Box<dyn StatisticsBlock>,
    stage: Stage,
    ring: [Option<Issued>; LATENCY],
    ticks: u64,
    up_request: StatType,
    down_request: StatType,
    request_all_until: Option<u32>,
    request_all_up: bool,
    request_all_down: bool,
    ongoing: StatSnapshot,
    last: StatSnapshot,
    clients: [Option<Registration>; MAX_CLIENTS],
    generation: u32,
}

impl StatsEngine {
    pub fn new(block: Box<dyn StatisticsBlock>) -> Self {
        Self {
            block,
            stage: Stage::UpAvg,
            ring: [None; LATENCY],
            ticks: 0,
            up_request: StatType::NONE,
            down_request: StatType::NONE,
            request_all_until: None,
            request_all_up: false,
            request_all_down: false,
            ongoing: StatSnapshot::default(),
            last: StatSnapshot::default(),
            clients: [None; MAX_CLIENTS],
            generation: 0,
        }
    }

    /// Forget every request, registration and sample.
    pub fn reset(&mut self) {
        debug!("statistics engine reset");
        self.stage = Stage::UpAvg;
        self.ring = [None; LATENCY];
        self.ticks = 0;
        self.up_request = StatType::NONE;
        self.down_request = StatType::NONE;
        self.request_all_until = None;
        self.request_all_up = false;
        self.request_all_down = false;
        self.ongoing = StatSnapshot::default();
        self.last = StatSnapshot::default();
        self.clients = [None; MAX_CLIENTS];
    }

    /// Stage that the next tick will program.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Persistent request mask of a single location.
    pub fn request_mask(&self, location: StatLocation) -> StatType {
        match location {
            StatLocation::Up => self.up_request,
            StatLocation::Down => self.down_request,
            StatLocation::Both => self.up_request | self.down_request,
        }
    }

    pub fn request_all_active(&self) -> bool {
        self.request_all_until.is_some()
    }

    /// Hardware bad pixel counter, owned by the statistics block.
    pub fn bad_pixel_count(&self) -> Result<u32> {
        self.block
            .bad_pixel_count()
            .map_err(|e| IspError::hal(Block::BadPixel, e))
    }

    fn effective(&self, location: StatLocation) -> StatType {
        let (mask, overridden) = match location {
            StatLocation::Up => (self.up_request, self.request_all_up),
            _ => (self.down_request, self.request_all_down),
        };
        if overridden && self.request_all_active() {
            mask | StatType::AVG_AND_BINS
        } else {
            mask
        }
    }

    fn cycle_start(&self, location: StatLocation) -> Stage {
        let avg = self.effective(location).contains(StatType::AVG);
        match (location, avg) {
            (StatLocation::Up, true) => Stage::UpAvg,
            (StatLocation::Up, false) => Stage::UpBins0To2,
            (_, true) => Stage::DownAvg,
            (_, false) => Stage::DownBins0To2,
        }
    }

    fn cycle_end(&self, location: StatLocation) -> Stage {
        let bins = self.effective(location).contains(StatType::BINS);
        match (location, bins) {
            (StatLocation::Up, true) => Stage::UpBins9To11,
            (StatLocation::Up, false) => Stage::UpAvg,
            (_, true) => Stage::DownBins9To11,
            (_, false) => Stage::DownAvg,
        }
    }

    fn next_stage(&self, current: Stage) -> Stage {
        if self.request_all_active() {
            return current.succ();
        }
        let up = self.effective(StatLocation::Up);
        let down = self.effective(StatLocation::Down);
        let up_avg = (up.contains(StatType::AVG), Stage::UpAvg);
        let up_bins = (up.contains(StatType::BINS), Stage::UpBins0To2);
        let down_avg = (down.contains(StatType::AVG), Stage::DownAvg);
        let down_bins = (down.contains(StatType::BINS), Stage::DownBins0To2);

        let order = match current {
            Stage::UpAvg => [up_bins, down_avg, down_bins, up_avg],
            Stage::UpBins9To11 => [down_avg, down_bins, up_avg, up_bins],
            Stage::DownAvg => [down_bins, up_avg, up_bins, down_avg],
            Stage::DownBins9To11 => [up_avg, up_bins, down_avg, down_bins],
            // a bin quadruple always runs to completion
            mid => return mid.succ(),
        };
        order
            .into_iter()
            .find_map(|(requested, stage)| requested.then_some(stage))
            .unwrap_or(Stage::UpAvg)
    }

    fn read_stage(&mut self, stage: Stage, geometry: &StatGeometry) -> Result<()> {
        let mut counters = [0u32; STAT_CHANNELS];
        for (channel, counter) in counters.iter_mut().enumerate() {
            *counter = self
                .block
                .read_counter(channel)
                .map_err(|e| IspError::hal(Block::Statistics, e))?;
        }
        let location = stage.location();
        let sample = match location {
            StatLocation::Up => &mut self.ongoing.up,
            _ => &mut self.ongoing.down,
        };
        match stage.bins() {
            Some(range) => {
                let first = range.first_bin();
                sample.histogram[first..first + STAT_CHANNELS].copy_from_slice(&counters);
            }
            None => {
                sample.average_r = average(counters[0], geometry, location, Component::Red);
                sample.average_g = average(counters[1], geometry, location, Component::Green);
                sample.average_b = average(counters[2], geometry, location, Component::Blue);
                let (r, g, b) = (sample.average_r, sample.average_g, sample.average_b);
                sample.average_l = if location == StatLocation::Down && geometry.mono {
                    luminance_mono(r, g, b)
                } else {
                    luminance(r, g, b)
                };
            }
        }
        Ok(())
    }

    fn program_stage(&mut self, stage: Stage) -> Result<()> {
        for channel in 0..STAT_CHANNELS {
            self.block
                .configure_channel(channel, stage.channel_config(channel))
                .and_then(|_| self.block.enable_channel(channel))
                .map_err(|e| IspError::hal(Block::Statistics, e))?;
        }
        Ok(())
    }

    /// Advance the cycle by one frame. Called once per main-pipe VSYNC with
    /// the already incremented frame id.
    ///
    /// # Errors
    ///
    /// A failed readout or configuration leaves the stage unchanged so the
    /// next tick retries it.
    pub fn tick(&mut self, frame_id: u32, geometry: &StatGeometry) -> Result<()> {
        let slot = (self.ticks % LATENCY as u64) as usize;
        let issued = self.ring[slot];

        if let Some(issued) = issued {
            trace!(
                "frame {} reading {:?} issued on tick {}",
                frame_id,
                issued.stage,
                issued.tick
            );
            self.read_stage(issued.stage, geometry)?;
        }

        if let Err(err) = self.program_stage(self.stage) {
            warn!("cannot program statistic stage {:?}: {}", self.stage, err);
            return Err(err);
        }
        self.ring[slot] = Some(Issued {
            stage: self.stage,
            tick: self.ticks,
        });

        if let Some(issued) = issued {
            for location in [StatLocation::Up, StatLocation::Down] {
                if issued.stage == self.cycle_start(location) {
                    *self.ongoing_start(location) = Some(frame_id);
                }
            }
            for location in [StatLocation::Up, StatLocation::Down] {
                if issued.stage == self.cycle_end(location) {
                    self.publish(location, frame_id);
                }
            }
        }

        if self
            .request_all_until
            .is_some_and(|until| frame_id != until && reached(frame_id, until))
        {
            debug!("request-all override expired at frame {}", frame_id);
            self.request_all_until = None;
            self.request_all_up = false;
            self.request_all_down = false;
        }

        self.stage = self.next_stage(self.stage);
        self.ticks += 1;
        Ok(())
    }

    fn ongoing_start(&mut self, location: StatLocation) -> &mut Option<u32> {
        match location {
            StatLocation::Up => &mut self.ongoing.up_start,
            _ => &mut self.ongoing.down_start,
        }
    }

    fn publish(&mut self, location: StatLocation, frame_id: u32) {
        match location {
            StatLocation::Up => {
                if let Some(start) = self.ongoing.up_start.take() {
                    self.last.up = std::mem::take(&mut self.ongoing.up);
                    self.last.up_start = Some(start);
                    self.last.up_end = Some(frame_id);
                    trace!("up cycle {}..={} published", start, frame_id);
                }
            }
            _ => {
                if let Some(start) = self.ongoing.down_start.take() {
                    self.last.down = std::mem::take(&mut self.ongoing.down);
                    self.last.down_start = Some(start);
                    self.last.down_end = Some(frame_id);
                    trace!("down cycle {}..={} published", start, frame_id);
                }
            }
        }
    }

    /// Add `kind` to the persistent request mask of `location`. The
    /// [`StatType::ALL`] bit instead arms the temporary override.
    pub fn request_stats(&mut self, frame_id: u32, location: StatLocation, kind: StatType) {
        let permanent = StatType(kind.0 & StatType::AVG_AND_BINS.0);
        if location.includes_up() {
            self.up_request |= permanent;
        }
        if location.includes_down() {
            self.down_request |= permanent;
        }
        if kind.contains(StatType::ALL) {
            self.request_all_up |= location.includes_up();
            self.request_all_down |= location.includes_down();
            self.request_all_until = Some(frame_id.wrapping_add(REQUEST_ALL_FRAMES));
        }
    }

    /// Register `client` for the first cycle of `location` starting at or
    /// after `frame_id + delay`.
    ///
    /// # Errors
    ///
    /// [`IspError::ResourceExhausted`] when all slots are taken; the request
    /// masks are left untouched.
    pub fn get_next(
        &mut self,
        frame_id: u32,
        client: StatClient,
        location: StatLocation,
        kind: StatType,
        delay: u32,
    ) -> Result<StatTicket> {
        let slot = self
            .clients
            .iter()
            .position(Option::is_none)
            .ok_or(IspError::ResourceExhausted)?;

        self.request_stats(frame_id, location, kind);

        self.generation = self.generation.wrapping_add(1);
        let target = frame_id.wrapping_add(delay);
        self.clients[slot] = Some(Registration {
            client,
            location,
            target,
            generation: self.generation,
        });
        trace!("{:?} waits for {:?} stats from frame {}", client, location, target);
        Ok(StatTicket {
            slot,
            generation: self.generation,
        })
    }

    /// Most recently completed statistics.
    pub fn latest(&self) -> StatSnapshot {
        self.last
    }

    /// Match registrations against the published statistics. Matched
    /// registrations are removed and returned in slot order.
    pub fn process_callbacks(&mut self) -> Vec<Delivery> {
        let last = self.last;
        let ready =
            |loc_start: Option<u32>, target: u32| loc_start.is_some_and(|s| reached(s, target));
        let mut deliveries = Vec::new();
        for (slot, entry) in self.clients.iter_mut().enumerate() {
            let Some(reg) = *entry else { continue };
            let matched = match reg.location {
                StatLocation::Up => ready(last.up_start, reg.target),
                StatLocation::Down => ready(last.down_start, reg.target),
                StatLocation::Both => {
                    ready(last.up_start, reg.target) && ready(last.down_start, reg.target)
                }
            };
            if matched {
                *entry = None;
                deliveries.push(Delivery {
                    client: reg.client,
                    location: reg.location,
                    ticket: StatTicket {
                        slot,
                        generation: reg.generation,
                    },
                    snapshot: last,
                });
            }
        }
        deliveries
    }

    /// Cancel a registration. Returns false for a ticket that already fired
    /// or was superseded.
    pub fn cancel(&mut self, ticket: StatTicket) -> bool {
        match self.clients.get_mut(ticket.slot) {
            Some(entry) if entry.is_some_and(|r| r.generation == ticket.generation) => {
                *entry = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel every registration held by `client`.
    pub fn cancel_owner(&mut self, client: StatClient) -> usize {
        let mut cancelled = 0;
        for entry in self.clients.iter_mut() {
            if entry.is_some_and(|r| r.client == client) {
                *entry = None;
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn cancel_all(&mut self) {
        self.clients = [None; MAX_CLIENTS];
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.clients.iter().filter(|c| c.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capability::HalResult, error::HalError};

    struct NullBlock;

    impl StatisticsBlock for NullBlock {
        fn configure_channel(&mut self, _: usize, _: StatChannelConfig) -> HalResult<()> {
            Ok(())
        }
        fn enable_channel(&mut self, _: usize) -> HalResult<()> {
            Ok(())
        }
        fn read_counter(&self, _: usize) -> HalResult<u32> {
            Ok(0)
        }
        fn bad_pixel_count(&self) -> HalResult<u32> {
            Err(HalError::Unsupported)
        }
    }

    fn engine() -> StatsEngine {
        StatsEngine::new(Box::new(NullBlock))
    }

    #[test]
    fn test_nothing_requested_parks_on_up_avg() {
        let e = engine();
        for stage in Stage::ALL {
            let next = e.next_stage(stage);
            if stage.bins().is_some() && !matches!(stage, Stage::UpBins9To11 | Stage::DownBins9To11) {
                assert_eq!(next, stage.succ());
            } else {
                assert_eq!(next, Stage::UpAvg);
            }
        }
    }

    #[test]
    fn test_down_avg_only() {
        let mut e = engine();
        e.request_stats(0, StatLocation::Down, StatType::AVG);
        assert_eq!(e.next_stage(Stage::UpAvg), Stage::DownAvg);
        assert_eq!(e.next_stage(Stage::DownAvg), Stage::DownAvg);
        assert_eq!(e.cycle_start(StatLocation::Down), Stage::DownAvg);
        assert_eq!(e.cycle_end(StatLocation::Down), Stage::DownAvg);
    }

    #[test]
    fn test_round_robin_all_permanent() {
        let mut e = engine();
        e.request_stats(0, StatLocation::Both, StatType::AVG_AND_BINS);
        let mut stage = Stage::UpAvg;
        let mut seen = vec![stage];
        for _ in 0..CYCLE_LEN - 1 {
            stage = e.next_stage(stage);
            seen.push(stage);
        }
        assert_eq!(seen, Stage::ALL.to_vec());
        assert_eq!(e.next_stage(Stage::DownBins9To11), Stage::UpAvg);
    }

    #[test]
    fn test_request_all_expires_without_clearing_permanent() {
        let mut e = engine();
        e.request_stats(0, StatLocation::Down, StatType::AVG);
        e.request_stats(0, StatLocation::Up, StatType::ALL);
        assert!(e.request_all_active());
        assert_eq!(e.next_stage(Stage::DownAvg), Stage::DownBins0To2);
        let geometry = StatGeometry::default();
        for frame in 1..=REQUEST_ALL_FRAMES + 1 {
            e.tick(frame, &geometry).unwrap();
        }
        assert!(!e.request_all_active());
        assert_eq!(e.request_mask(StatLocation::Down), StatType::AVG);
        assert_eq!(e.request_mask(StatLocation::Up), StatType::NONE);
    }

    #[test]
    fn test_frame_ids_wrap() {
        assert!(reached(u32::MAX, u32::MAX));
        assert!(reached(1, u32::MAX - 1));
        assert!(!reached(u32::MAX - 1, 1));
    }

    #[test]
    fn test_delivery_across_frame_wrap() {
        let mut e = engine();
        let geometry = StatGeometry::default();
        let start = u32::MAX - 1;
        e.get_next(start, StatClient::Tool, StatLocation::Down, StatType::AVG, 2)
            .unwrap();
        assert!(e.request_mask(StatLocation::Down).contains(StatType::AVG));

        // target is frame 0, the first DownAvg cycle starts on frame 2
        let mut delivered = Vec::new();
        let mut frame = start;
        for _ in 0..6 {
            frame = frame.wrapping_add(1);
            e.tick(frame, &geometry).unwrap();
            if !e.process_callbacks().is_empty() {
                delivered.push(frame);
            }
        }
        assert_eq!(delivered, vec![2]);
        assert_eq!(e.latest().down_start, Some(2));
        assert_eq!(e.registered(), 0);
    }

    #[test]
    fn test_request_all_expires_across_frame_wrap() {
        let mut e = engine();
        let geometry = StatGeometry::default();
        let start = u32::MAX - 5;
        e.request_stats(start, StatLocation::Up, StatType::ALL);
        let mut frame = start;
        for _ in 0..REQUEST_ALL_FRAMES {
            frame = frame.wrapping_add(1);
            e.tick(frame, &geometry).unwrap();
            assert!(e.request_all_active(), "frame {}", frame);
        }
        frame = frame.wrapping_add(1);
        e.tick(frame, &geometry).unwrap();
        assert!(!e.request_all_active());
    }

    #[test]
    fn test_average_conversion() {
        let geometry = StatGeometry {
            area: StatArea {
                x0: 0,
                y0: 0,
                x_size: 640,
                y_size: 480,
            },
            decimation: 1,
            mono: false,
        };
        // 307200 pixels down, accumulator counts value/256 per pixel
        let accu = 100 * 307_200 / 256;
        assert_eq!(average(accu, &geometry, StatLocation::Down, Component::Red), 100);
        let green = 100 * 153_600 / 256;
        assert_eq!(average(green, &geometry, StatLocation::Up, Component::Green), 100);
        let red = 100 * 76_800 / 256;
        assert_eq!(average(red, &geometry, StatLocation::Up, Component::Red), 100);
        let empty = StatGeometry::default();
        assert_eq!(average(1234, &empty, StatLocation::Down, Component::Blue), 0);
    }

    #[test]
    fn test_luminance() {
        assert_eq!(luminance(255, 255, 255), 255);
        assert_eq!(luminance(100, 100, 100), 100);
        assert_eq!(luminance(200, 100, 50), 124);
        assert_eq!(luminance_mono(100, 100, 100), 255);
        assert_eq!(luminance_mono(10, 20, 30), 60);
    }

    #[test]
    fn test_stale_ticket() {
        let mut e = engine();
        let first = e.get_next(0, StatClient::Tool, StatLocation::Down, StatType::AVG, 2).unwrap();
        assert!(e.cancel(first));
        let second = e.get_next(0, StatClient::Tool, StatLocation::Down, StatType::AVG, 2).unwrap();
        assert!(!e.cancel(first));
        assert_eq!(e.registered(), 1);
        assert!(e.cancel(second));
    }

    #[test]
    fn test_channel_config() {
        let cfg = Stage::UpAvg.channel_config(1);
        assert_eq!(cfg.mode, StatMode::Average);
        assert_eq!(cfg.source, StatSource::PreBlackLevel(Component::Green));
        let cfg = Stage::DownBins6To8.channel_config(2);
        assert_eq!(cfg.mode, StatMode::Bins(BinRange::UpMid));
        assert_eq!(cfg.source, StatSource::PostDemosaic(Component::Luminance));
    }
}
