// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types and the closed status-code taxonomy carried on the wire.

use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = IspError> = std::result::Result<T, E>;

/// Image-quality block or service an error relates to.
///
/// Used to pick the block-specific status code when an [`IspError`] is
/// reported to the tuning tool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Block {
    Demosaicing,
    StatRemoval,
    Decimation,
    Contrast,
    StatArea,
    BadPixel,
    BlackLevel,
    IspGain,
    ColorConv,
    IqParam,
    SensorInfo,
    SensorGain,
    SensorExposure,
    SensorTestPattern,
    Gamma,
    Statistics,
    Pipeline,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Block::Demosaicing => "demosaicing",
            Block::StatRemoval => "stat removal",
            Block::Decimation => "decimation",
            Block::Contrast => "contrast",
            Block::StatArea => "stat area",
            Block::BadPixel => "bad pixel",
            Block::BlackLevel => "black level",
            Block::IspGain => "ISP gain",
            Block::ColorConv => "color conversion",
            Block::IqParam => "IQ params",
            Block::SensorInfo => "sensor info",
            Block::SensorGain => "sensor gain",
            Block::SensorExposure => "sensor exposure",
            Block::SensorTestPattern => "sensor test pattern",
            Block::Gamma => "gamma",
            Block::Statistics => "statistics",
            Block::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// Pixel-pipeline faults reported by the capability layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineFault {
    State,
    Stop,
    Start,
    Downsize,
    ConfigPipe,
    DumpTimeout,
    PixelFormat,
    FrameSize,
    NoMem,
}

impl fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Status::from(*self).message())
    }
}

/// Error returned by capability implementations (sensor driver, pipeline
/// HAL, application helpers).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HalError {
    /// The capability does not implement this optional operation.
    #[error("operation not supported")]
    Unsupported,
    /// The hardware rejected the operation.
    #[error("{0}")]
    Failed(String),
    /// The pixel pipeline reported a specific fault.
    #[error("pipeline fault: {0}")]
    Pipeline(PipelineFault),
}

/// Errors produced by the ISP control core.
#[derive(Debug, Error)]
pub enum IspError {
    #[error("{0} invalid arg")]
    InvalidParameter(Block),

    #[error("{block} HAL err: {source}")]
    HardwareFailure {
        block: Block,
        #[source]
        source: HalError,
    },

    #[error("app helper undefined: {0}")]
    MissingCapability(&'static str),

    #[error("stat max clients err")]
    ResourceExhausted,

    #[error("no white balance profile for {0}K")]
    UnknownColorTemperature(u32),

    #[error("algo err: {0}")]
    AlgorithmFailure(String),

    #[error("unknown command id {0:#04x}")]
    UnknownCommand(u8),

    #[error("unknown operation {0:#04x}")]
    UnknownOperation(u8),

    #[error("pipeline fault: {0}")]
    Pipeline(PipelineFault),

    #[error("malformed payload for command {0:#04x}")]
    Malformed(u8),

    #[error("tuning tool link closed")]
    Disconnected,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IspError {
    /// Map a capability failure onto the error for `block`.
    pub fn hal(block: Block, source: HalError) -> Self {
        match source {
            HalError::Unsupported => IspError::MissingCapability(helper_name(block)),
            HalError::Pipeline(fault) => IspError::Pipeline(fault),
            source => IspError::HardwareFailure { block, source },
        }
    }

    /// Wire status code for this error.
    pub fn status(&self) -> Status {
        match self {
            IspError::InvalidParameter(block) => invalid_status(*block),
            IspError::HardwareFailure { block, .. } => hal_status(*block),
            IspError::MissingCapability(_) => Status::AppHelperUndefined,
            IspError::ResourceExhausted => Status::StatMaxClients,
            IspError::UnknownColorTemperature(_) => Status::WbColorTemp,
            IspError::AlgorithmFailure(_) => Status::Algo,
            IspError::UnknownCommand(_) => Status::CmdParserCommand,
            IspError::UnknownOperation(_) => Status::CmdParserOperation,
            IspError::Pipeline(fault) => Status::from(*fault),
            IspError::Malformed(_) | IspError::Disconnected => Status::InvalidArg,
            IspError::Json(_) => Status::IqParamInvalid,
            IspError::Io(_) => Status::IqParamMissing,
        }
    }
}

fn helper_name(block: Block) -> &'static str {
    match block {
        Block::SensorTestPattern => "set_test_pattern",
        Block::Pipeline => "app helper",
        Block::SensorInfo => "sensor info",
        Block::SensorGain => "sensor gain",
        Block::SensorExposure => "sensor exposure",
        _ => "pipeline",
    }
}

fn invalid_status(block: Block) -> Status {
    match block {
        Block::Demosaicing => Status::DemosaicingInvalid,
        Block::StatRemoval => Status::StatRemovalInvalid,
        Block::Decimation => Status::DecimationInvalid,
        Block::Contrast => Status::ContrastInvalid,
        Block::StatArea => Status::StatAreaInvalid,
        Block::BadPixel => Status::BadPixelInvalid,
        Block::BlackLevel => Status::BlackLevelInvalid,
        Block::IspGain => Status::IspGainInvalid,
        Block::ColorConv => Status::ColorConvInvalid,
        Block::IqParam => Status::IqParamInvalid,
        Block::SensorInfo => Status::SensorInfoInvalid,
        Block::SensorGain => Status::SensorGainInvalid,
        Block::SensorExposure => Status::SensorExposureInvalid,
        Block::SensorTestPattern => Status::SensorTestPattern,
        Block::Gamma => Status::DcmippGamma,
        Block::Statistics => Status::StatInvalid,
        Block::Pipeline => Status::InvalidArg,
    }
}

fn hal_status(block: Block) -> Status {
    match block {
        Block::Demosaicing => Status::DemosaicingHal,
        Block::StatRemoval => Status::StatRemovalHal,
        Block::Decimation => Status::DecimationHal,
        Block::Contrast => Status::ContrastHal,
        Block::StatArea => Status::StatAreaHal,
        Block::BadPixel => Status::BadPixelHal,
        Block::BlackLevel => Status::BlackLevelHal,
        Block::IspGain => Status::IspGainHal,
        Block::ColorConv => Status::ColorConvHal,
        Block::IqParam => Status::IqParamHal,
        Block::SensorInfo => Status::SensorInfo,
        Block::SensorGain => Status::SensorGain,
        Block::SensorExposure => Status::SensorExposure,
        Block::SensorTestPattern => Status::SensorTestPattern,
        Block::Gamma => Status::DcmippGamma,
        Block::Statistics => Status::StatHal,
        Block::Pipeline => Status::DcmippState,
    }
}

/// Closed status-code taxonomy. The numeric values are part of the tuning
/// tool wire protocol and must not change.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    InvalidArg = 1,
    DemosaicingInvalid = 10,
    DemosaicingHal = 11,
    StatRemovalInvalid = 20,
    StatRemovalHal = 21,
    DecimationInvalid = 30,
    DecimationHal = 31,
    ContrastInvalid = 40,
    ContrastHal = 41,
    StatAreaInvalid = 50,
    StatAreaHal = 51,
    BadPixelInvalid = 60,
    BadPixelHal = 61,
    BlackLevelInvalid = 70,
    BlackLevelHal = 71,
    IspGainInvalid = 80,
    IspGainHal = 81,
    ColorConvInvalid = 90,
    ColorConvHal = 91,
    IqParamInvalid = 100,
    IqParamHal = 101,
    IqParamMissing = 102,
    SensorInfoInvalid = 110,
    SensorInfo = 111,
    SensorGainInvalid = 120,
    SensorGain = 121,
    SensorExposureInvalid = 130,
    SensorExposure = 131,
    DcmippState = 140,
    DcmippStop = 141,
    DcmippStart = 142,
    DcmippDownsize = 143,
    DcmippConfigPipe = 144,
    DcmippDumpTimeout = 145,
    DcmippPixelFormat = 146,
    DcmippFrameSize = 147,
    DcmippNoMem = 148,
    DcmippGamma = 149,
    WbColorTemp = 150,
    CmdParserCommand = 160,
    CmdParserOperation = 161,
    StatInvalid = 170,
    StatHal = 171,
    StatMaxClients = 172,
    AppHelperUndefined = 180,
    Algo = 190,
    SensorTestPattern = 200,
}

impl Status {
    const ALL: [Status; 48] = [
        Status::Ok,
        Status::InvalidArg,
        Status::DemosaicingInvalid,
        Status::DemosaicingHal,
        Status::StatRemovalInvalid,
        Status::StatRemovalHal,
        Status::DecimationInvalid,
        Status::DecimationHal,
        Status::ContrastInvalid,
        Status::ContrastHal,
        Status::StatAreaInvalid,
        Status::StatAreaHal,
        Status::BadPixelInvalid,
        Status::BadPixelHal,
        Status::BlackLevelInvalid,
        Status::BlackLevelHal,
        Status::IspGainInvalid,
        Status::IspGainHal,
        Status::ColorConvInvalid,
        Status::ColorConvHal,
        Status::IqParamInvalid,
        Status::IqParamHal,
        Status::IqParamMissing,
        Status::SensorInfoInvalid,
        Status::SensorInfo,
        Status::SensorGainInvalid,
        Status::SensorGain,
        Status::SensorExposureInvalid,
        Status::SensorExposure,
        Status::DcmippState,
        Status::DcmippStop,
        Status::DcmippStart,
        Status::DcmippDownsize,
        Status::DcmippConfigPipe,
        Status::DcmippDumpTimeout,
        Status::DcmippPixelFormat,
        Status::DcmippFrameSize,
        Status::DcmippNoMem,
        Status::DcmippGamma,
        Status::WbColorTemp,
        Status::CmdParserCommand,
        Status::CmdParserOperation,
        Status::StatInvalid,
        Status::StatHal,
        Status::StatMaxClients,
        Status::AppHelperUndefined,
        Status::Algo,
        Status::SensorTestPattern,
    ];

    /// Short human-readable description, as shown by the tuning tool.
    pub fn message(self) -> &'static str {
        match self {
            Status::Ok => "No err",
            Status::InvalidArg => "Invalid arg",
            Status::DemosaicingInvalid => "Demosaicing invalid arg",
            Status::DemosaicingHal => "Demosaicing HAL err",
            Status::StatRemovalInvalid => "Stat Removal invalid arg",
            Status::StatRemovalHal => "Stat Removal HAL err",
            Status::DecimationInvalid => "Decimation invalid arg",
            Status::DecimationHal => "Decimation HAL err",
            Status::ContrastInvalid => "Contrast invalid arg",
            Status::ContrastHal => "Contrast HAL err",
            Status::StatAreaInvalid => "Stat Area invalid arg",
            Status::StatAreaHal => "Stat Area HAL err",
            Status::BadPixelInvalid => "Bad Pixel invalid arg",
            Status::BadPixelHal => "Bad Pixel HAL err",
            Status::BlackLevelInvalid => "Black level invalid arg",
            Status::BlackLevelHal => "Black level HAL err",
            Status::IspGainInvalid => "ISP gain invalid arg",
            Status::IspGainHal => "ISP gain HAL err",
            Status::ColorConvInvalid => "Color conv invalid arg",
            Status::ColorConvHal => "Color conv HAL err",
            Status::IqParamInvalid => "IQ Params invalid arg",
            Status::IqParamHal => "IQ Params HAL err",
            Status::IqParamMissing => "IQ Params missing",
            Status::SensorInfoInvalid => "Sensor info invalid arg",
            Status::SensorInfo => "Sensor info err",
            Status::SensorGainInvalid => "Sensor gain invalid arg",
            Status::SensorGain => "Sensor gain err",
            Status::SensorExposureInvalid => "Sensor exposure invalid arg",
            Status::SensorExposure => "Sensor exposure err",
            Status::DcmippState => "DCMIPP state err",
            Status::DcmippStop => "DCMIPP stop err",
            Status::DcmippStart => "DCMIPP start err",
            Status::DcmippDownsize => "DCMIPP downsize err",
            Status::DcmippConfigPipe => "DCMIPP pipe config err",
            Status::DcmippDumpTimeout => "DCMIPP dump timeout",
            Status::DcmippPixelFormat => "DCMIPP pixel format err",
            Status::DcmippFrameSize => "DCMIPP frame size err",
            Status::DcmippNoMem => "DCMIPP memory err",
            Status::DcmippGamma => "DCMIPP gamma err",
            Status::WbColorTemp => "WB ColorTemp err",
            Status::CmdParserCommand => "CmdParser CMD err",
            Status::CmdParserOperation => "CmdParser OP err",
            Status::StatInvalid => "Stat invalid arg",
            Status::StatHal => "Stat HAL err",
            Status::StatMaxClients => "Stat Max Clients err",
            Status::AppHelperUndefined => "App Helper undefined",
            Status::Algo => "Algo err",
            Status::SensorTestPattern => "Sensor Test Pattern",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), *self as u8)
    }
}

impl From<PipelineFault> for Status {
    fn from(fault: PipelineFault) -> Self {
        match fault {
            PipelineFault::State => Status::DcmippState,
            PipelineFault::Stop => Status::DcmippStop,
            PipelineFault::Start => Status::DcmippStart,
            PipelineFault::Downsize => Status::DcmippDownsize,
            PipelineFault::ConfigPipe => Status::DcmippConfigPipe,
            PipelineFault::DumpTimeout => Status::DcmippDumpTimeout,
            PipelineFault::PixelFormat => Status::DcmippPixelFormat,
            PipelineFault::FrameSize => Status::DcmippFrameSize,
            PipelineFault::NoMem => Status::DcmippNoMem,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| *status as u8 == code)
            .ok_or(code)
    }
}
