// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Tuning tool wire protocol.
//!
//! Every packet starts with a four byte header: operation, parameter id, a
//! status byte (zero on requests) and a reserved byte. The payload that
//! follows depends on the parameter id, see [`codec`].
//!
//! ```text
//! +-----------+----+--------+----------+---------------------+
//! | operation | id | status | reserved | payload ...         |
//! +-----------+----+--------+----------+---------------------+
//! ```

pub mod codec;
pub mod parser;
pub mod transport;

use crate::{
    error::{IspError, Result, Status},
    iq_param::{
        AecAlgo, AwbAlgo, BadPixel, BadPixelAlgo, BlackLevel, ColorConv, Contrast, Demosaicing,
        Gamma, IspGain, StatArea, StatRemoval,
    },
    stats::{StatLocation, StatSnapshot},
};
use codec::{ExposureTarget, Payload, Reader, WbRefMode, Writer};

pub use parser::process_command;
pub use transport::{channel, ChannelTransport, ToolLink, Transport};

pub const HEADER_LEN: usize = 4;

/// Largest dump chunk handed to the transport.
pub const MAX_DUMP_CHUNK: usize = 4096;

pub const DUMP_START: &[u8] = b"DUMP DATA[";
pub const DUMP_END: &[u8] = b"DUMP DATA]";

/// Frames between a tool statistics request and the cycle it waits for.
pub const TOOL_STAT_DELAY: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Set = 0x00,
    Get = 0x01,
    SetOk = 0x80,
    SetFail = 0x81,
    GetOk = 0x82,
    GetFail = 0x83,
}

impl TryFrom<u8> for Operation {
    type Error = IspError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Operation::Set),
            0x01 => Ok(Operation::Get),
            0x80 => Ok(Operation::SetOk),
            0x81 => Ok(Operation::SetFail),
            0x82 => Ok(Operation::GetOk),
            0x83 => Ok(Operation::GetFail),
            other => Err(IspError::UnknownOperation(other)),
        }
    }
}

/// Parameter ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    StatRemoval = 0x00,
    Decimation = 0x01,
    Demosaicing = 0x02,
    Contrast = 0x03,
    StatisticArea = 0x04,
    SensorGain = 0x05,
    SensorExposure = 0x06,
    BadPixelAlgo = 0x07,
    BadPixelStatic = 0x08,
    BlackLevelStatic = 0x09,
    AecAlgo = 0x0A,
    AwbAlgo = 0x0B,
    AwbProfile = 0x0C,
    IspGainStatic = 0x0D,
    ColorConvStatic = 0x0E,
    StatisticUp = 0x0F,
    StatisticDown = 0x10,
    DumpPreviewFrame = 0x11,
    DumpIspFrame = 0x12,
    DumpRawFrame = 0x13,
    StopPreview = 0x14,
    StartPreview = 0x15,
    DcmippVersion = 0x16,
    Gamma = 0x17,
    SensorInfo = 0x18,
    SensorTestPattern = 0x19,
    SensorDelay = 0x1A,
    UserExposureTarget = 0x80,
    UserListWbRefModes = 0x81,
    UserWbRefMode = 0x82,
    UserGetDecimation = 0x83,
    UserStatisticArea = 0x84,
}

impl CommandId {
    pub const ALL: [CommandId; 32] = [
        CommandId::StatRemoval,
        CommandId::Decimation,
        CommandId::Demosaicing,
        CommandId::Contrast,
        CommandId::StatisticArea,
        CommandId::SensorGain,
        CommandId::SensorExposure,
        CommandId::BadPixelAlgo,
        CommandId::BadPixelStatic,
        CommandId::BlackLevelStatic,
        CommandId::AecAlgo,
        CommandId::AwbAlgo,
        CommandId::AwbProfile,
        CommandId::IspGainStatic,
        CommandId::ColorConvStatic,
        CommandId::StatisticUp,
        CommandId::StatisticDown,
        CommandId::DumpPreviewFrame,
        CommandId::DumpIspFrame,
        CommandId::DumpRawFrame,
        CommandId::StopPreview,
        CommandId::StartPreview,
        CommandId::DcmippVersion,
        CommandId::Gamma,
        CommandId::SensorInfo,
        CommandId::SensorTestPattern,
        CommandId::SensorDelay,
        CommandId::UserExposureTarget,
        CommandId::UserListWbRefModes,
        CommandId::UserWbRefMode,
        CommandId::UserGetDecimation,
        CommandId::UserStatisticArea,
    ];
}

impl TryFrom<u8> for CommandId {
    type Error = IspError;

    fn try_from(value: u8) -> Result<Self> {
        CommandId::ALL
            .into_iter()
            .find(|id| *id as u8 == value)
            .ok_or(IspError::UnknownCommand(value))
    }
}

/// Packet header. The id is kept raw so that replies can echo ids this
/// side does not know.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub operation: Operation,
    pub id: u8,
    pub status: Status,
}

impl Header {
    pub fn new(operation: Operation, id: u8) -> Self {
        Self {
            operation,
            id,
            status: Status::Ok,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [self.operation as u8, self.id, self.status as u8, 0]
    }

    /// # Errors
    ///
    /// [`IspError::Malformed`] on a packet shorter than the header,
    /// [`IspError::UnknownOperation`] on an operation byte outside the
    /// protocol.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(IspError::Malformed(bytes.get(1).copied().unwrap_or(0)));
        }
        let operation = Operation::try_from(bytes[0])?;
        let status = Status::try_from(bytes[2]).unwrap_or(Status::InvalidArg);
        Ok(Self {
            operation,
            id: bytes[1],
            status,
        })
    }
}

/// A decoded SET request.
#[derive(Clone, Debug, PartialEq)]
pub enum SetCommand {
    StatRemoval(StatRemoval),
    Demosaicing(Demosaicing),
    Contrast(Contrast),
    StatisticArea(StatArea),
    SensorGain(u32),
    SensorExposure(u32),
    BadPixelAlgo(BadPixelAlgo),
    BadPixelStatic(BadPixel),
    BlackLevelStatic(BlackLevel),
    AecAlgo(AecAlgo),
    AwbAlgo(AwbAlgo),
    IspGainStatic(IspGain),
    ColorConvStatic(ColorConv),
    StopPreview,
    StartPreview,
    Gamma(Gamma),
    SensorTestPattern(i32),
    SensorDelay,
    UserExposureTarget(ExposureTarget),
    UserWbRefMode(WbRefMode),
    UserStatisticArea(StatArea),
}

impl SetCommand {
    pub fn id(&self) -> CommandId {
        match self {
            SetCommand::StatRemoval(_) => CommandId::StatRemoval,
            SetCommand::Demosaicing(_) => CommandId::Demosaicing,
            SetCommand::Contrast(_) => CommandId::Contrast,
            SetCommand::StatisticArea(_) => CommandId::StatisticArea,
            SetCommand::SensorGain(_) => CommandId::SensorGain,
            SetCommand::SensorExposure(_) => CommandId::SensorExposure,
            SetCommand::BadPixelAlgo(_) => CommandId::BadPixelAlgo,
            SetCommand::BadPixelStatic(_) => CommandId::BadPixelStatic,
            SetCommand::BlackLevelStatic(_) => CommandId::BlackLevelStatic,
            SetCommand::AecAlgo(_) => CommandId::AecAlgo,
            SetCommand::AwbAlgo(_) => CommandId::AwbAlgo,
            SetCommand::IspGainStatic(_) => CommandId::IspGainStatic,
            SetCommand::ColorConvStatic(_) => CommandId::ColorConvStatic,
            SetCommand::StopPreview => CommandId::StopPreview,
            SetCommand::StartPreview => CommandId::StartPreview,
            SetCommand::Gamma(_) => CommandId::Gamma,
            SetCommand::SensorTestPattern(_) => CommandId::SensorTestPattern,
            SetCommand::SensorDelay => CommandId::SensorDelay,
            SetCommand::UserExposureTarget(_) => CommandId::UserExposureTarget,
            SetCommand::UserWbRefMode(_) => CommandId::UserWbRefMode,
            SetCommand::UserStatisticArea(_) => CommandId::UserStatisticArea,
        }
    }

    /// Decode the payload of a SET for `id`.
    ///
    /// # Errors
    ///
    /// [`IspError::UnknownCommand`] for ids that cannot be set,
    /// [`IspError::Malformed`] for a short payload.
    pub fn decode(id: CommandId, payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(id as u8, payload);
        let cmd = match id {
            CommandId::StatRemoval => SetCommand::StatRemoval(r.get()?),
            CommandId::Demosaicing => SetCommand::Demosaicing(r.get()?),
            CommandId::Contrast => SetCommand::Contrast(r.get()?),
            CommandId::StatisticArea => SetCommand::StatisticArea(r.get()?),
            CommandId::SensorGain => SetCommand::SensorGain(r.get()?),
            CommandId::SensorExposure => SetCommand::SensorExposure(r.get()?),
            CommandId::BadPixelAlgo => SetCommand::BadPixelAlgo(r.get()?),
            CommandId::BadPixelStatic => SetCommand::BadPixelStatic(r.get()?),
            CommandId::BlackLevelStatic => SetCommand::BlackLevelStatic(r.get()?),
            CommandId::AecAlgo => SetCommand::AecAlgo(r.get()?),
            CommandId::AwbAlgo => SetCommand::AwbAlgo(r.get()?),
            CommandId::IspGainStatic => SetCommand::IspGainStatic(r.get()?),
            CommandId::ColorConvStatic => SetCommand::ColorConvStatic(r.get()?),
            CommandId::StopPreview => SetCommand::StopPreview,
            CommandId::StartPreview => SetCommand::StartPreview,
            CommandId::Gamma => SetCommand::Gamma(r.get()?),
            CommandId::SensorTestPattern => SetCommand::SensorTestPattern(r.get()?),
            CommandId::SensorDelay => SetCommand::SensorDelay,
            CommandId::UserExposureTarget => SetCommand::UserExposureTarget(r.get()?),
            CommandId::UserWbRefMode => SetCommand::UserWbRefMode(r.get()?),
            CommandId::UserStatisticArea => SetCommand::UserStatisticArea(r.get()?),
            other => return Err(IspError::UnknownCommand(other as u8)),
        };
        Ok(cmd)
    }

    /// Full SET packet, header included.
    pub fn to_packet(&self) -> Vec<u8> {
        let mut w = Writer::with_header(Header::new(Operation::Set, self.id() as u8).to_bytes());
        match self {
            SetCommand::StatRemoval(v) => w.put(v),
            SetCommand::Demosaicing(v) => w.put(v),
            SetCommand::Contrast(v) => w.put(v),
            SetCommand::StatisticArea(v) | SetCommand::UserStatisticArea(v) => w.put(v),
            SetCommand::SensorGain(v) | SetCommand::SensorExposure(v) => w.put(v),
            SetCommand::BadPixelAlgo(v) => w.put(v),
            SetCommand::BadPixelStatic(v) => w.put(v),
            SetCommand::BlackLevelStatic(v) => w.put(v),
            SetCommand::AecAlgo(v) => w.put(v),
            SetCommand::AwbAlgo(v) => w.put(v),
            SetCommand::IspGainStatic(v) => w.put(v),
            SetCommand::ColorConvStatic(v) => w.put(v),
            SetCommand::Gamma(v) => w.put(v),
            SetCommand::SensorTestPattern(v) => w.put(v),
            SetCommand::UserExposureTarget(v) => w.put(v),
            SetCommand::UserWbRefMode(v) => w.put(v),
            SetCommand::StopPreview | SetCommand::StartPreview | SetCommand::SensorDelay => {}
        }
        w.into_bytes()
    }
}

/// GET request packet for `id`.
pub fn get_request(id: CommandId) -> Vec<u8> {
    Header::new(Operation::Get, id as u8).to_bytes().to_vec()
}

/// Header-only reply.
pub fn status_reply(operation: Operation, id: u8, status: Status) -> Vec<u8> {
    Header {
        operation,
        id,
        status,
    }
    .to_bytes()
    .to_vec()
}

/// GET_OK reply carrying `value`.
pub fn get_reply<T: Payload>(id: CommandId, value: &T) -> Vec<u8> {
    let mut w = Writer::with_header(Header::new(Operation::GetOk, id as u8).to_bytes());
    w.put(value);
    w.into_bytes()
}

/// Deferred reply to a statistics GET.
pub fn statistics_reply(location: StatLocation, snapshot: &StatSnapshot) -> Vec<u8> {
    match location {
        StatLocation::Up => get_reply(CommandId::StatisticUp, &snapshot.up),
        _ => get_reply(CommandId::StatisticDown, &snapshot.down),
    }
}

/// Unsolicited report of a finished sensor delay measurement.
pub fn sensor_delay_reply(delay: u32) -> Vec<u8> {
    get_reply(CommandId::SensorDelay, &delay)
}

/// One transport write of a frame dump.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DumpChunk<'a> {
    pub start: bool,
    pub data: &'a [u8],
    pub end: bool,
}

impl DumpChunk<'_> {
    /// Chunk data framed with its markers.
    pub fn to_packet(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(self.data.len() + DUMP_START.len() + DUMP_END.len());
        if self.start {
            packet.extend_from_slice(DUMP_START);
        }
        packet.extend_from_slice(self.data);
        if self.end {
            packet.extend_from_slice(DUMP_END);
        }
        packet
    }
}

/// Split a frame buffer into transport writes of at most
/// [`MAX_DUMP_CHUNK`] bytes. The first chunk carries the start marker and
/// the last the end marker; a buffer that fits in one chunk carries both.
pub fn dump_chunks(data: &[u8]) -> Vec<DumpChunk<'_>> {
    if data.len() <= MAX_DUMP_CHUNK {
        return vec![DumpChunk {
            start: true,
            data,
            end: true,
        }];
    }
    let count = data.len().div_ceil(MAX_DUMP_CHUNK);
    data.chunks(MAX_DUMP_CHUNK)
        .enumerate()
        .map(|(i, data)| DumpChunk {
            start: i == 0,
            data,
            end: i + 1 == count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capability::BayerPattern, iq_param::AwbProfile};

    #[test]
    fn test_header() {
        let header = Header::parse(&[0x81, 0x04, 51, 0]).unwrap();
        assert_eq!(header.operation, Operation::SetFail);
        assert_eq!(header.id, 0x04);
        assert_eq!(header.status, Status::StatAreaHal);
        assert_eq!(header.to_bytes(), [0x81, 0x04, 51, 0]);

        assert!(matches!(
            Header::parse(&[0x07, 0x00, 0, 0]),
            Err(IspError::UnknownOperation(0x07))
        ));
        assert!(matches!(Header::parse(&[0x00]), Err(IspError::Malformed(0))));
    }

    #[test]
    fn test_command_ids() {
        for id in CommandId::ALL {
            assert_eq!(CommandId::try_from(id as u8).unwrap(), id);
        }
        assert!(matches!(
            CommandId::try_from(0x42),
            Err(IspError::UnknownCommand(0x42))
        ));
    }

    #[test]
    fn test_get_only_ids_rejected_on_set() {
        for id in [
            CommandId::Decimation,
            CommandId::AwbProfile,
            CommandId::StatisticUp,
            CommandId::DumpRawFrame,
            CommandId::SensorInfo,
        ] {
            let err = SetCommand::decode(id, &[0; 64]).unwrap_err();
            assert_eq!(err.status(), Status::CmdParserCommand);
        }
    }

    fn every_set_command() -> Vec<SetCommand> {
        let mut awb = AwbAlgo {
            enable: false,
            ..Default::default()
        };
        awb.profiles[0].id = "horizon-daylight-reference-0123".into();
        awb.profiles[1].offset = [-1023, 7, 1023];
        awb.profiles[2].coeff[1] = [-399_000_000, 1, 399_000_000];
        awb.profiles.push(AwbProfile {
            id: "CWF".into(),
            color_temp: 7500,
            gain_r: 250_000_000,
            gain_g: 99_000_000,
            gain_b: 1,
            coeff: [[1, -2, 3], [-4, 5, -6], [7, -8, 9]],
            offset: [-3, -2, -1],
        });

        vec![
            SetCommand::StatRemoval(StatRemoval {
                enable: true,
                head_lines: 7,
                valid_lines: 4094,
            }),
            SetCommand::Demosaicing(Demosaicing {
                enable: false,
                bayer: BayerPattern::Bggr,
                peak: 1,
                line_v: 2,
                line_h: 3,
                edge: 7,
            }),
            SetCommand::Contrast(Contrast {
                enable: true,
                coeff: [0, 50, 100, 150, 200, 250, 300, 350, 394],
            }),
            SetCommand::StatisticArea(StatArea {
                x0: 1,
                y0: 2,
                x_size: 4093,
                y_size: 4094,
            }),
            SetCommand::SensorGain(24_000),
            SetCommand::SensorExposure(0x0102_0304),
            SetCommand::BadPixelAlgo(BadPixelAlgo {
                enable: true,
                threshold: 123_456,
            }),
            SetCommand::BadPixelStatic(BadPixel {
                enable: true,
                strength: 6,
                count: 42,
            }),
            SetCommand::BlackLevelStatic(BlackLevel {
                enable: true,
                r: 255,
                g: 1,
                b: 128,
            }),
            SetCommand::AecAlgo(AecAlgo {
                enable: false,
                exposure_compensation: -4,
                exposure_target: 14,
                tolerance: 3,
                anti_flicker_hz: 50,
            }),
            SetCommand::AwbAlgo(awb),
            SetCommand::IspGainStatic(IspGain {
                enable: true,
                r: 1_600_000_000,
                g: 0,
                b: 123_456_789,
            }),
            SetCommand::ColorConvStatic(ColorConv {
                enable: true,
                coeff: [[-1, 2, -3], [4, -5, 6], [-7, 8, -399_000_000]],
                offset: [-1023, 0, 1023],
            }),
            SetCommand::StopPreview,
            SetCommand::StartPreview,
            SetCommand::Gamma(Gamma {
                enable_pipe1: false,
                enable_pipe2: true,
            }),
            SetCommand::SensorTestPattern(-1),
            SetCommand::SensorDelay,
            SetCommand::UserExposureTarget(ExposureTarget {
                compensation: -3,
                target: 28,
            }),
            SetCommand::UserWbRefMode(WbRefMode {
                automatic: false,
                color_temp: 6500,
            }),
            SetCommand::UserStatisticArea(StatArea {
                x0: 4094,
                y0: 0,
                x_size: 4,
                y_size: 5,
            }),
        ]
    }

    #[test]
    fn test_set_payloads_survive_encoding() {
        let commands = every_set_command();
        for cmd in &commands {
            let packet = cmd.to_packet();
            let header = Header::parse(&packet).unwrap();
            assert_eq!(header.operation, Operation::Set);
            assert_eq!(header.id, cmd.id() as u8);
            let decoded = SetCommand::decode(cmd.id(), &packet[HEADER_LEN..]).unwrap();
            assert_eq!(&decoded, cmd);
        }

        // every id accepted on SET is covered above
        let zeros = [0u8; 2048];
        let settable: Vec<CommandId> = CommandId::ALL
            .into_iter()
            .filter(|id| !matches!(SetCommand::decode(*id, &zeros), Err(IspError::UnknownCommand(_))))
            .collect();
        let covered: Vec<CommandId> = commands.iter().map(SetCommand::id).collect();
        assert_eq!(covered, settable);
    }

    #[test]
    fn test_small_dump_single_chunk() {
        let data = [7u8; 100];
        let chunks = dump_chunks(&data);
        assert_eq!(chunks.len(), 1);
        let packet = chunks[0].to_packet();
        assert!(packet.starts_with(DUMP_START));
        assert!(packet.ends_with(DUMP_END));
        assert_eq!(packet.len(), 100 + DUMP_START.len() + DUMP_END.len());
    }

    #[test]
    fn test_exact_chunk_multiple() {
        let data = vec![0u8; 2 * MAX_DUMP_CHUNK];
        let chunks = dump_chunks(&data);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].start && !chunks[0].end);
        assert!(!chunks[1].start && chunks[1].end);
    }
}
