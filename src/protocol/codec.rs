// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Payload encoding.
//!
//! Payloads are little-endian with fields in declaration order. Booleans and
//! `u8` take one byte, 32-bit integers four bytes and identifiers a fixed
//! 32 byte zero padded string.
//!
//! Blocks are packed: there is no alignment padding between fields. A tool
//! exchanging natively aligned C structs (for example a `u8` flag followed
//! by a `u32`, which carries three padding bytes) is not byte-compatible and
//! needs to pack its payloads first.

use crate::{
    capability::{BayerPattern, DumpMeta, FrameFormat, SensorInfo},
    error::{IspError, Result},
    iq_param::{
        AecAlgo, AwbAlgo, AwbProfile, BadPixel, BadPixelAlgo, BlackLevel, ColorConv, Contrast,
        DecimationFactor, Demosaicing, Gamma, IspGain, StatArea, StatRemoval, AWB_MAX_PROFILES,
        PROFILE_ID_LEN,
    },
    stats::StatSample,
};

/// Append-only payload writer.
#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(header: [u8; 4]) -> Self {
        Self {
            bytes: header.to_vec(),
        }
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.bytes.push(value as u8);
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Fixed size string, truncated to leave room for a terminating zero.
    pub fn str(&mut self, value: &str) {
        let mut field = [0u8; PROFILE_ID_LEN];
        let len = value.len().min(PROFILE_ID_LEN - 1);
        field[..len].copy_from_slice(&value.as_bytes()[..len]);
        self.bytes.extend_from_slice(&field);
    }

    pub fn put<T: Payload>(&mut self, value: &T) {
        value.encode(self);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over a received payload. Reading past the end fails with
/// [`IspError::Malformed`] for the command being decoded.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    id: u8,
}

impl<'a> Reader<'a> {
    pub fn new(id: u8, bytes: &'a [u8]) -> Self {
        Self { bytes, id }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.bytes.len() < N {
            return Err(IspError::Malformed(self.id));
        }
        let (head, tail) = self.bytes.split_at(N);
        self.bytes = tail;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_le_bytes)
    }

    pub fn str(&mut self) -> Result<String> {
        let field = self.take::<PROFILE_ID_LEN>()?;
        let len = field.iter().position(|b| *b == 0).unwrap_or(PROFILE_ID_LEN);
        Ok(String::from_utf8_lossy(&field[..len]).into_owned())
    }

    pub fn get<T: Payload>(&mut self) -> Result<T> {
        T::decode(self)
    }

    fn invalid(&self) -> IspError {
        IspError::Malformed(self.id)
    }
}

/// A value with a wire representation.
pub trait Payload: Sized {
    fn encode(&self, w: &mut Writer);

    fn decode(r: &mut Reader<'_>) -> Result<Self>;
}

/// Encode `value` on its own.
pub fn to_bytes<T: Payload>(value: &T) -> Vec<u8> {
    let mut w = Writer::new();
    value.encode(&mut w);
    w.into_bytes()
}

/// Decode a `T` from the start of `bytes`.
pub fn from_bytes<T: Payload>(id: u8, bytes: &[u8]) -> Result<T> {
    T::decode(&mut Reader::new(id, bytes))
}

impl Payload for u32 {
    fn encode(&self, w: &mut Writer) {
        w.u32(*self);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.u32()
    }
}

impl Payload for i32 {
    fn encode(&self, w: &mut Writer) {
        w.i32(*self);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.i32()
    }
}

impl Payload for [u32; AWB_MAX_PROFILES] {
    fn encode(&self, w: &mut Writer) {
        self.iter().for_each(|v| w.u32(*v));
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let mut out = [0; AWB_MAX_PROFILES];
        for v in out.iter_mut() {
            *v = r.u32()?;
        }
        Ok(out)
    }
}

impl Payload for StatRemoval {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.u32(self.head_lines);
        w.u32(self.valid_lines);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable: r.bool()?,
            head_lines: r.u32()?,
            valid_lines: r.u32()?,
        })
    }
}

impl Payload for DecimationFactor {
    fn encode(&self, w: &mut Writer) {
        w.u8(*self as u8);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        DecimationFactor::try_from(r.u8()? as u32)
    }
}

impl Payload for Demosaicing {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.u8(self.bayer as u8);
        w.u8(self.peak);
        w.u8(self.line_v);
        w.u8(self.line_h);
        w.u8(self.edge);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let enable = r.bool()?;
        let bayer = BayerPattern::try_from(r.u8()?).map_err(|_| r.invalid())?;
        Ok(Self {
            enable,
            bayer,
            peak: r.u8()?,
            line_v: r.u8()?,
            line_h: r.u8()?,
            edge: r.u8()?,
        })
    }
}

impl Payload for Contrast {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        self.coeff.iter().for_each(|c| w.u32(*c));
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let enable = r.bool()?;
        let mut coeff = [0; 9];
        for c in coeff.iter_mut() {
            *c = r.u32()?;
        }
        Ok(Self { enable, coeff })
    }
}

impl Payload for StatArea {
    fn encode(&self, w: &mut Writer) {
        w.u32(self.x0);
        w.u32(self.y0);
        w.u32(self.x_size);
        w.u32(self.y_size);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            x0: r.u32()?,
            y0: r.u32()?,
            x_size: r.u32()?,
            y_size: r.u32()?,
        })
    }
}

impl Payload for BadPixelAlgo {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.u32(self.threshold);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable: r.bool()?,
            threshold: r.u32()?,
        })
    }
}

impl Payload for BadPixel {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.u8(self.strength);
        w.u32(self.count);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable: r.bool()?,
            strength: r.u8()?,
            count: r.u32()?,
        })
    }
}

impl Payload for BlackLevel {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.u8(self.r);
        w.u8(self.g);
        w.u8(self.b);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable: r.bool()?,
            r: r.u8()?,
            g: r.u8()?,
            b: r.u8()?,
        })
    }
}

impl Payload for AecAlgo {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.i32(self.exposure_compensation);
        w.u32(self.exposure_target);
        w.u32(self.tolerance);
        w.u32(self.anti_flicker_hz);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable: r.bool()?,
            exposure_compensation: r.i32()?,
            exposure_target: r.u32()?,
            tolerance: r.u32()?,
            anti_flicker_hz: r.u32()?,
        })
    }
}

/// AWB tuning as a fixed table of [`AWB_MAX_PROFILES`] slots; unused slots
/// carry a zero temperature.
impl Payload for AwbAlgo {
    fn encode(&self, w: &mut Writer) {
        let slot = |i: usize| self.profiles.get(i).cloned().unwrap_or_default();
        let slots: Vec<AwbProfile> = (0..AWB_MAX_PROFILES).map(slot).collect();
        w.bool(self.enable);
        slots.iter().for_each(|p| w.str(&p.id));
        slots.iter().for_each(|p| w.u32(p.color_temp));
        slots.iter().for_each(|p| w.u32(p.gain_r));
        slots.iter().for_each(|p| w.u32(p.gain_g));
        slots.iter().for_each(|p| w.u32(p.gain_b));
        for p in &slots {
            p.coeff.iter().flatten().for_each(|c| w.i32(*c));
        }
        for p in &slots {
            p.offset.iter().for_each(|o| w.i32(*o));
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let enable = r.bool()?;
        let mut slots: [AwbProfile; AWB_MAX_PROFILES] = Default::default();
        for p in slots.iter_mut() {
            p.id = r.str()?;
        }
        for p in slots.iter_mut() {
            p.color_temp = r.u32()?;
        }
        for p in slots.iter_mut() {
            p.gain_r = r.u32()?;
        }
        for p in slots.iter_mut() {
            p.gain_g = r.u32()?;
        }
        for p in slots.iter_mut() {
            p.gain_b = r.u32()?;
        }
        for p in slots.iter_mut() {
            for c in p.coeff.iter_mut().flatten() {
                *c = r.i32()?;
            }
        }
        for p in slots.iter_mut() {
            for o in p.offset.iter_mut() {
                *o = r.i32()?;
            }
        }
        Ok(Self {
            enable,
            profiles: slots.into_iter().filter(|p| p.color_temp != 0).collect(),
        })
    }
}

/// Identity of the applied white balance profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AwbProfileInfo {
    pub id: String,
    pub color_temp: u32,
}

impl Payload for AwbProfileInfo {
    fn encode(&self, w: &mut Writer) {
        w.str(&self.id);
        w.u32(self.color_temp);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            id: r.str()?,
            color_temp: r.u32()?,
        })
    }
}

impl Payload for IspGain {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        w.u32(self.r);
        w.u32(self.g);
        w.u32(self.b);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable: r.bool()?,
            r: r.u32()?,
            g: r.u32()?,
            b: r.u32()?,
        })
    }
}

impl Payload for ColorConv {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable);
        self.coeff.iter().flatten().for_each(|c| w.i32(*c));
        self.offset.iter().for_each(|o| w.i32(*o));
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let mut conv = ColorConv {
            enable: r.bool()?,
            ..Default::default()
        };
        for c in conv.coeff.iter_mut().flatten() {
            *c = r.i32()?;
        }
        for o in conv.offset.iter_mut() {
            *o = r.i32()?;
        }
        Ok(conv)
    }
}

impl Payload for StatSample {
    fn encode(&self, w: &mut Writer) {
        w.u8(self.average_r);
        w.u8(self.average_g);
        w.u8(self.average_b);
        w.u8(self.average_l);
        self.histogram.iter().for_each(|b| w.u32(*b));
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let mut sample = StatSample {
            average_r: r.u8()?,
            average_g: r.u8()?,
            average_b: r.u8()?,
            average_l: r.u8()?,
            ..Default::default()
        };
        for bin in sample.histogram.iter_mut() {
            *bin = r.u32()?;
        }
        Ok(sample)
    }
}

impl Payload for DumpMeta {
    fn encode(&self, w: &mut Writer) {
        w.u32(self.size);
        w.u32(self.width);
        w.u32(self.height);
        w.u32(self.pitch);
        w.u8(self.format as u8);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let size = r.u32()?;
        let width = r.u32()?;
        let height = r.u32()?;
        let pitch = r.u32()?;
        let format = FrameFormat::try_from(r.u8()?).map_err(|_| r.invalid())?;
        Ok(Self {
            size,
            width,
            height,
            pitch,
            format,
        })
    }
}

/// Exposure compensation with the target luminance it yields.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExposureTarget {
    pub compensation: i32,
    pub target: u32,
}

impl Payload for ExposureTarget {
    fn encode(&self, w: &mut Writer) {
        w.i32(self.compensation);
        w.u32(self.target);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            compensation: r.i32()?,
            target: r.u32()?,
        })
    }
}

/// White balance mode: automatic, or a manual reference temperature.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WbRefMode {
    pub automatic: bool,
    pub color_temp: u32,
}

impl Payload for WbRefMode {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.automatic);
        w.u32(self.color_temp);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            automatic: r.bool()?,
            color_temp: r.u32()?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Payload for Version {
    fn encode(&self, w: &mut Writer) {
        w.u32(self.major);
        w.u32(self.minor);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            major: r.u32()?,
            minor: r.u32()?,
        })
    }
}

impl Payload for Gamma {
    fn encode(&self, w: &mut Writer) {
        w.bool(self.enable_pipe1);
        w.bool(self.enable_pipe2);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            enable_pipe1: r.bool()?,
            enable_pipe2: r.bool()?,
        })
    }
}

impl Payload for SensorInfo {
    fn encode(&self, w: &mut Writer) {
        w.str(&self.name);
        w.u8(self.bayer_pattern as u8);
        w.u8(self.color_depth);
        w.u32(self.width);
        w.u32(self.height);
        w.u32(self.gain_min);
        w.u32(self.gain_max);
        w.u32(self.exposure_min);
        w.u32(self.exposure_max);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let name = r.str()?;
        let bayer_pattern = BayerPattern::try_from(r.u8()?).map_err(|_| r.invalid())?;
        Ok(Self {
            name,
            bayer_pattern,
            color_depth: r.u8()?,
            width: r.u32()?,
            height: r.u32()?,
            gain_min: r.u32()?,
            gain_max: r.u32()?,
            exposure_min: r.u32()?,
            exposure_max: r.u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let bytes = to_bytes(&StatRemoval {
            enable: true,
            head_lines: 2,
            valid_lines: 0x0102,
        });
        assert_eq!(bytes, vec![1, 2, 0, 0, 0, 2, 1, 0, 0]);
    }

    #[test]
    fn test_short_payload() {
        let err = from_bytes::<IspGain>(0x0D, &[1, 0, 0]).unwrap_err();
        assert!(matches!(err, IspError::Malformed(0x0D)));
    }

    #[test]
    fn test_fixed_strings() {
        let info = AwbProfileInfo {
            id: "TL84".into(),
            color_temp: 4000,
        };
        let bytes = to_bytes(&info);
        assert_eq!(bytes.len(), PROFILE_ID_LEN + 4);
        assert_eq!(&bytes[..5], b"TL84\0");
        assert_eq!(from_bytes::<AwbProfileInfo>(0x0C, &bytes).unwrap(), info);
    }

    #[test]
    fn test_awb_unused_slots() {
        let awb = AwbAlgo::default();
        let bytes = to_bytes(&awb);
        let slots = AWB_MAX_PROFILES;
        assert_eq!(bytes.len(), 1 + slots * (PROFILE_ID_LEN + 16 + 36 + 12));
        assert_eq!(from_bytes::<AwbAlgo>(0x0B, &bytes).unwrap(), awb);
    }

    #[test]
    fn test_invalid_enum() {
        assert!(from_bytes::<Demosaicing>(0x02, &[1, 9, 0, 0, 0, 0]).is_err());
        assert!(from_bytes::<DecimationFactor>(0x01, &[3]).is_err());
    }
}
