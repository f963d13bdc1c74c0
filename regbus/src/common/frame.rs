use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::{DecodeLevel, FrameDecodeLevel};
use crate::error::{InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::tcp::frame::MbapParser;
use crate::types::UnitId;

#[cfg(any(test, feature = "serial"))]
use crate::serial::frame::RtuParser;

pub(crate) mod constants {
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
}

/// Transaction identifier from the MBAP header, echoed back in the response
#[derive(PartialEq, Copy, Clone, Debug, Default)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// Where a request frame is headed: a specific unit or every unit
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum FrameDestination {
    /// Normal unit addressing
    UnitId(UnitId),
    /// Broadcast addressing, only write requests are processed and no response is sent
    Broadcast,
}

impl FrameDestination {
    pub(crate) fn new(unit_id: UnitId) -> Self {
        if unit_id == UnitId::broadcast() {
            FrameDestination::Broadcast
        } else {
            FrameDestination::UnitId(unit_id)
        }
    }

    pub(crate) fn value(&self) -> u8 {
        match self {
            FrameDestination::UnitId(unit_id) => unit_id.to_u8(),
            FrameDestination::Broadcast => UnitId::broadcast().to_u8(),
        }
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        matches!(self, FrameDestination::Broadcast)
    }
}

impl std::fmt::Display for FrameDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameDestination::UnitId(unit_id) => write!(f, "{unit_id}"),
            FrameDestination::Broadcast => write!(f, "BCAST"),
        }
    }
}

#[derive(Copy, Clone)]
pub(crate) struct FrameHeader {
    pub(crate) destination: FrameDestination,
    /// Transaction id, only present on TCP
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp_header(destination: FrameDestination, tx_id: TxId) -> Self {
        FrameHeader {
            destination,
            tx_id: Some(tx_id),
        }
    }

    #[cfg(any(test, feature = "serial"))]
    pub(crate) fn new_rtu_header(destination: FrameDestination) -> Self {
        FrameHeader {
            destination,
            tx_id: None,
        }
    }
}

pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.pdu.len() {
            return false;
        }

        self.pdu[0..src.len()].copy_from_slice(src);
        self.length = src.len();
        true
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}

/// Function code byte as it goes on the wire, covering the error responses
/// for which no [FunctionCode] value exists
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum FunctionField {
    Valid(FunctionCode),
    Exception(FunctionCode),
    UnknownFunction(u8),
}

impl FunctionField {
    pub(crate) fn get_value(self) -> u8 {
        match self {
            FunctionField::Valid(fc) => fc.get_value(),
            FunctionField::Exception(fc) => fc.as_error(),
            FunctionField::UnknownFunction(fc) => fc | 0x80,
        }
    }
}

/// Reads complete frames off a physical layer, buffering partial reads
pub(crate) struct FramedReader {
    parser: FrameParser,
    buffer: ReadBuffer,
}

enum FrameParser {
    Mbap(MbapParser),
    #[cfg(any(test, feature = "serial"))]
    Rtu(RtuParser),
}

impl FramedReader {
    pub(crate) fn tcp() -> Self {
        Self {
            parser: FrameParser::Mbap(MbapParser::new()),
            buffer: ReadBuffer::new(crate::tcp::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    #[cfg(any(test, feature = "serial"))]
    pub(crate) fn rtu_request() -> Self {
        Self {
            parser: FrameParser::Rtu(RtuParser::new_request_parser()),
            buffer: ReadBuffer::new(crate::serial::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    /// Discard any buffered bytes and reset the parser state.
    ///
    /// Used after an RTU CRC failure where the protocol demands silence and
    /// the inter-frame gap delimits the next frame.
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        match &mut self.parser {
            FrameParser::Mbap(parser) => parser.reset(),
            #[cfg(any(test, feature = "serial"))]
            FrameParser::Rtu(parser) => parser.reset(),
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        decode: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            let result = match &mut self.parser {
                FrameParser::Mbap(parser) => parser.parse(&mut self.buffer, decode.frame)?,
                #[cfg(any(test, feature = "serial"))]
                FrameParser::Rtu(parser) => parser.parse(&mut self.buffer, decode.frame)?,
            };

            match result {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io, decode.physical).await?;
                }
            }
        }
    }
}

/// Formats reply frames into a fixed internal buffer
pub(crate) struct FrameWriter {
    kind: FrameWriterKind,
    buffer: [u8; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
}

#[derive(Copy, Clone)]
enum FrameWriterKind {
    Mbap,
    #[cfg(any(test, feature = "serial"))]
    Rtu,
}

impl FrameWriter {
    pub(crate) fn tcp() -> Self {
        Self {
            kind: FrameWriterKind::Mbap,
            buffer: [0; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
        }
    }

    #[cfg(any(test, feature = "serial"))]
    pub(crate) fn rtu() -> Self {
        Self {
            kind: FrameWriterKind::Rtu,
            buffer: [0; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format_reply(
        &mut self,
        header: FrameHeader,
        function: FunctionCode,
        body: &dyn Serialize,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if level.app.enabled() {
            tracing::info!("PDU TX - {function}");
        }
        self.format(header, FunctionField::Valid(function), body, level)
    }

    pub(crate) fn format_exception(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        ex: ExceptionCode,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if level.app.enabled() {
            tracing::warn!("PDU TX - Modbus exception {:?} ({:#04X})", ex, u8::from(ex));
        }
        self.format(header, function, &ex, level)
    }

    fn format(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        body: &dyn Serialize,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        let total = match self.kind {
            FrameWriterKind::Mbap => Self::format_mbap(&mut self.buffer, header, function, body)?,
            #[cfg(any(test, feature = "serial"))]
            FrameWriterKind::Rtu => Self::format_rtu(&mut self.buffer, header, function, body)?,
        };

        let frame = self
            .buffer
            .get(..total)
            .ok_or(InternalError::BadSeekOperation)?;

        if level.frame.enabled() {
            tracing::info!(
                "FRAME TX - dest: {} {}",
                header.destination,
                FramePayloadDisplay::new(level.frame, frame)
            );
        }

        Ok(frame)
    }

    fn format_mbap(
        buffer: &mut [u8],
        header: FrameHeader,
        function: FunctionField,
        body: &dyn Serialize,
    ) -> Result<usize, RequestError> {
        let mut cursor = WriteCursor::new(buffer);
        cursor.write_u16_be(header.tx_id.unwrap_or_default().to_u16())?;
        cursor.write_u16_be(0)?;
        cursor.seek_from_current(2)?; // patch the length field afterwards
        cursor.write_u8(header.destination.value())?;

        let adu_length: usize = {
            let start = cursor.position();
            cursor.write_u8(function.get_value())?;
            body.serialize(&mut cursor)?;
            cursor.position() - start
        };

        // length field includes the unit identifier
        let length_field = u16::try_from(adu_length + 1)
            .map_err(|_| InternalError::BadByteCount(adu_length + 1))?;
        cursor.seek_from_start(4)?;
        cursor.write_u16_be(length_field)?;

        Ok(crate::tcp::frame::constants::HEADER_LENGTH + adu_length)
    }

    #[cfg(any(test, feature = "serial"))]
    fn format_rtu(
        buffer: &mut [u8],
        header: FrameHeader,
        function: FunctionField,
        body: &dyn Serialize,
    ) -> Result<usize, RequestError> {
        let mut cursor = WriteCursor::new(buffer);
        cursor.write_u8(header.destination.value())?;
        cursor.write_u8(function.get_value())?;
        body.serialize(&mut cursor)?;

        let end = cursor.position();
        let crc = crate::serial::frame::CRC.checksum(
            cursor
                .get(0..end)
                .ok_or(InternalError::BadSeekOperation)?,
        );
        cursor.write_u16_le(crc)?;

        Ok(cursor.position())
    }
}

pub(crate) struct FramePayloadDisplay<'a> {
    level: FrameDecodeLevel,
    bytes: &'a [u8],
}

impl<'a> FramePayloadDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, bytes: &'a [u8]) -> Self {
        Self { level, bytes }
    }
}

impl std::fmt::Display for FramePayloadDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "(len = {})", self.bytes.len())?;
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}
