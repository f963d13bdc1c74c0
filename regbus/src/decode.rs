/// Controls the decoding of transmitted and received data at the application, frame, and physical layer
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DecodeLevel {
    /// Controls decoding of the application layer (PDU)
    pub app: AppDecodeLevel,
    /// Controls decoding of the frame layer
    ///
    /// On TCP, this is the MBAP header. On serial, this is the RTU envelope.
    pub frame: FrameDecodeLevel,
    /// Controls the logging of physical layer reads/writes
    pub physical: PhysDecodeLevel,
}

/// Controls how transmitted and received Protocol Data Units (PDUs) are decoded at the INFO log level
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum AppDecodeLevel {
    /// Decode nothing
    #[default]
    Nothing,
    /// Decode the function code only
    FunctionCode,
    /// Decode the function code and the general description of the data
    DataHeaders,
    /// Decode the function code, the general description of the data and the actual data values
    DataValues,
}

/// Controls how the frame envelope is decoded at the INFO log level
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum FrameDecodeLevel {
    /// Decode nothing
    #[default]
    Nothing,
    /// Decode the header
    Header,
    /// Decode the header and the raw payload as hexadecimal
    Payload,
}

/// Controls how data transmitted at the physical layer (TCP, serial, etc) is logged
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum PhysDecodeLevel {
    /// Log nothing
    #[default]
    Nothing,
    /// Log only the length of data that is sent and received
    Length,
    /// Log the length and the actual data that is sent and received
    Data,
}

impl DecodeLevel {
    /// construct a `DecodeLevel` with nothing enabled
    pub fn nothing() -> Self {
        Self::default()
    }

    /// construct a `DecodeLevel` from its fields
    pub fn new(app: AppDecodeLevel, frame: FrameDecodeLevel, physical: PhysDecodeLevel) -> Self {
        DecodeLevel {
            app,
            frame,
            physical,
        }
    }
}

impl From<AppDecodeLevel> for DecodeLevel {
    fn from(app: AppDecodeLevel) -> Self {
        Self {
            app,
            frame: FrameDecodeLevel::Nothing,
            physical: PhysDecodeLevel::Nothing,
        }
    }
}

impl AppDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.function_code()
    }

    pub(crate) fn function_code(&self) -> bool {
        match self {
            AppDecodeLevel::Nothing => false,
            AppDecodeLevel::FunctionCode => true,
            AppDecodeLevel::DataHeaders => true,
            AppDecodeLevel::DataValues => true,
        }
    }

    pub(crate) fn data_headers(&self) -> bool {
        match self {
            AppDecodeLevel::Nothing => false,
            AppDecodeLevel::FunctionCode => false,
            AppDecodeLevel::DataHeaders => true,
            AppDecodeLevel::DataValues => true,
        }
    }

    pub(crate) fn data_values(&self) -> bool {
        match self {
            AppDecodeLevel::Nothing => false,
            AppDecodeLevel::FunctionCode => false,
            AppDecodeLevel::DataHeaders => false,
            AppDecodeLevel::DataValues => true,
        }
    }
}

impl FrameDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.header_enabled()
    }

    pub(crate) fn header_enabled(&self) -> bool {
        match self {
            FrameDecodeLevel::Nothing => false,
            FrameDecodeLevel::Header => true,
            FrameDecodeLevel::Payload => true,
        }
    }

    pub(crate) fn payload_enabled(&self) -> bool {
        match self {
            FrameDecodeLevel::Nothing => false,
            FrameDecodeLevel::Header => false,
            FrameDecodeLevel::Payload => true,
        }
    }
}

impl PhysDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.length_enabled()
    }

    pub(crate) fn length_enabled(&self) -> bool {
        match self {
            PhysDecodeLevel::Nothing => false,
            PhysDecodeLevel::Length => true,
            PhysDecodeLevel::Data => true,
        }
    }

    pub(crate) fn data_enabled(&self) -> bool {
        match self {
            PhysDecodeLevel::Nothing => false,
            PhysDecodeLevel::Length => false,
            PhysDecodeLevel::Data => true,
        }
    }
}
