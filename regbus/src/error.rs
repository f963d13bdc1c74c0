use crate::exception::ExceptionCode;

/// Errors that can occur while servicing a session or parsing wire data
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying stream
    Io(std::io::ErrorKind),
    /// Frame-level framing error (MBAP header or RTU CRC)
    BadFrame(FrameParseError),
    /// PDU-level parsing error
    BadRequest(AduParseError),
    /// The request contained an invalid address range
    BadRange(InvalidRange),
    /// The operation failed with a Modbus exception
    Exception(ExceptionCode),
    /// An invariant of the library itself was violated
    Internal(InternalError),
    /// The engine is shutting down
    Shutdown,
}

/// Errors that occur while parsing a frame off a stream (TCP or serial)
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    MbapLengthZero,
    /// Received TCP frame with length that exceeds the max allowed size (actual, max)
    MbapLengthTooBig(usize, usize),
    /// Received TCP frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Received a frame bigger than the maximum ADU size (actual, max)
    FrameLengthTooBig(usize, usize),
    /// Received an RTU frame whose CRC does not match the computed value (received, expected)
    CrcValidationFailure(u16, u16),
    /// Received a function code whose frame length cannot be determined
    UnknownFunctionCode(u8),
}

/// Errors that occur while parsing a PDU body
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AduParseError {
    /// PDU is too short to be valid
    InsufficientBytes,
    /// Byte count field does not match the declared quantity (expected, actual)
    MismatchedByteCount(usize, usize),
    /// PDU contains extra trailing bytes
    TrailingBytes(usize),
    /// Coil state field was neither 0xFF00 nor 0x0000
    UnknownCoilState(u16),
}

/// Errors that result from an invalid address range in a request
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InvalidRange {
    /// Request contained a count of zero
    CountOfZero,
    /// Start and count would overflow the u16 address space (start, count)
    AddressOverflow(u16, u16),
    /// Count exceeds the per-request maximum for this type (count, max)
    CountTooLargeForType(u16, u16),
}

/// Errors that should only occur if there is a logic error in the library
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InternalError {
    /// Attempted to write more bytes than fit in the remaining buffer (requested, remaining)
    InsufficientWriteSpace(usize, usize),
    /// Attempted to read more bytes than present (requested, remaining)
    InsufficientBytesForRead(usize, usize),
    /// Cursor seek operation exceeded the bounds of the underlying buffer
    BadSeekOperation,
    /// Byte count would exceed the maximum size of a u8
    BadByteCount(usize),
}

/// Failure of a data-model access through the application API
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The addressed range falls outside the capacity of the table
    OutOfRange,
    /// The count is zero or exceeds the per-request protocol limit
    InvalidCount,
}

/// Errors caused by an invalid configuration, reported before the server starts
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The configuration file could not be read
    Io(std::io::ErrorKind),
    /// The configuration file is not valid JSON
    Json(String),
    /// The configuration does not define any slave
    NoSlaves,
    /// Slave addresses must be in the range 1 ..= 247
    InvalidUnitId(u8),
    /// Two slaves share the same address
    DuplicateUnitId(u8),
    /// The slave defines no table cells at all
    EmptyDevice(u8),
    /// Bad serial line settings
    InvalidSerialSettings(String),
}

/// Marker returned by read cursors when the requested bytes are not present
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct ReadError;

impl RequestError {
    /// Convert a dispatch failure into the exception code that goes on the wire.
    ///
    /// Only quantity/value violations map to `IllegalDataValue` and address
    /// violations to `IllegalDataAddress`; everything unexpected degrades to
    /// `ServerDeviceFailure` instead of crashing the session.
    pub(crate) fn into_exception(self) -> ExceptionCode {
        match self {
            RequestError::Exception(ex) => ex,
            RequestError::BadRange(InvalidRange::AddressOverflow(_, _)) => {
                ExceptionCode::IllegalDataAddress
            }
            RequestError::BadRange(_) => ExceptionCode::IllegalDataValue,
            RequestError::BadRequest(_) => ExceptionCode::IllegalDataValue,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}

impl std::error::Error for RequestError {}
impl std::error::Error for AccessError {}
impl std::error::Error for ConfigError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind}"),
            RequestError::BadFrame(err) => write!(f, "framing error: {err}"),
            RequestError::BadRequest(err) => write!(f, "invalid PDU: {err}"),
            RequestError::BadRange(err) => write!(f, "invalid range: {err}"),
            RequestError::Exception(ex) => write!(f, "Modbus exception: {ex}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::Shutdown => f.write_str("server is shutting down"),
        }
    }
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received frame length ({size}) exceeds the maximum allowed length ({max})"
            ),
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received CRC value {received:#06X} does not match the expected value {expected:#06X}"
            ),
            FrameParseError::UnknownFunctionCode(fc) => {
                write!(f, "cannot determine frame length for function code {fc:#04X}")
            }
        }
    }
}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("PDU is too short to be valid"),
            AduParseError::MismatchedByteCount(expected, actual) => write!(
                f,
                "byte count ({actual}) does not match the declared quantity (requires {expected})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "PDU contains {remaining} extra trailing bytes")
            }
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the representation of u16"
            ),
            InvalidRange::CountTooLargeForType(count, max) => write!(
                f,
                "the request count of {count} exceeds the maximum allowed count of {max} for this type"
            ),
        }
    }
}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(requested, remaining) => write!(
                f,
                "attempted to write {requested} bytes with {remaining} bytes remaining"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} bytes with only {remaining} remaining"
            ),
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
            InternalError::BadByteCount(count) => {
                write!(f, "byte count would exceed the maximum size of a u8: {count}")
            }
        }
    }
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AccessError::OutOfRange => {
                f.write_str("addressed range falls outside the capacity of the table")
            }
            AccessError::InvalidCount => {
                f.write_str("count is zero or exceeds the per-request protocol limit")
            }
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Io(kind) => write!(f, "unable to read configuration: {kind}"),
            ConfigError::Json(err) => write!(f, "invalid configuration file: {err}"),
            ConfigError::NoSlaves => f.write_str("configuration does not define any slave"),
            ConfigError::InvalidUnitId(id) => {
                write!(f, "slave address {id} is outside the allowed range 1 ..= 247")
            }
            ConfigError::DuplicateUnitId(id) => {
                write!(f, "slave address {id} is defined more than once")
            }
            ConfigError::EmptyDevice(id) => {
                write!(f, "slave {id} does not define any table cells")
            }
            ConfigError::InvalidSerialSettings(err) => {
                write!(f, "bad serial line settings: {err}")
            }
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRange(err)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<ReadError> for RequestError {
    fn from(_: ReadError) -> Self {
        RequestError::BadRequest(AduParseError::InsufficientBytes)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.kind())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err.to_string())
    }
}
