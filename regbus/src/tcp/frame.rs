use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameDestination, FrameHeader, TxId};
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize =
        crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    destination: FrameDestination,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Begin;
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<MbapHeader, RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        Ok(MbapHeader {
            tx_id,
            adu_length: length - 1,
            destination: FrameDestination::new(unit_id),
        })
    }

    fn parse_body(header: &MbapHeader, cursor: &mut ReadBuffer) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new_tcp_header(header.destination, header.tx_id));
        frame.set(cursor.read(header.adu_length)?);
        Ok(frame)
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if cursor.len() < header.adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, cursor)?;
                self.state = ParseState::Begin;

                if decode_level.enabled() {
                    tracing::info!(
                        "FRAME RX - tx_id: {} dest: {} {}",
                        header.tx_id,
                        header.destination,
                        crate::common::frame::FramePayloadDisplay::new(
                            decode_level,
                            frame.payload()
                        )
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Header(Self::parse_header(cursor)?);
                self.parse(cursor, decode_level)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::block_on;
    use tokio_test::io::Builder;

    use crate::common::frame::{FramedReader, FrameWriter, FunctionField};
    use crate::common::function::FunctionCode;
    use crate::common::phys::PhysLayer;
    use crate::common::traits::Serialize;
    use crate::common::cursor::WriteCursor;
    use crate::decode::DecodeLevel;
    use crate::error::{FrameParseError, RequestError};

    use super::*;

    //                            |   tx id  |  proto id |  length  | unit |  payload  |
    const SIMPLE_FRAME: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x2A, 0x03, 0x04];

    struct MockBody {
        a: u8,
    }

    impl Serialize for MockBody {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            cursor.write_u8(self.a)?;
            Ok(())
        }
    }

    fn assert_equals_simple_frame(frame: &Frame) {
        assert_eq!(frame.header.tx_id, Some(TxId::new(0x0007)));
        assert_eq!(
            frame.header.destination,
            FrameDestination::new(UnitId::new(0x2A))
        );
        assert_eq!(frame.payload(), &[0x03, 0x04]);
    }

    fn test_segmented_parse(split_at: usize) {
        let (f1, f2) = SIMPLE_FRAME.split_at(split_at);
        let io = Builder::new().read(f1).read(f2).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::tcp();
        let frame = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap();

        assert_equals_simple_frame(&frame);
    }

    fn test_error(input: &[u8]) -> RequestError {
        let io = Builder::new().read(input).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::tcp();
        block_on(reader.next_frame(&mut phys, DecodeLevel::nothing()))
            .err()
            .unwrap()
    }

    #[test]
    fn correctly_formats_frame() {
        let mut writer = FrameWriter::tcp();
        let body = MockBody { a: 0x04 };
        let header = FrameHeader::new_tcp_header(
            FrameDestination::new(UnitId::new(42)),
            TxId::new(7),
        );
        let output = writer
            .format_reply(
                header,
                FunctionCode::ReadHoldingRegisters,
                &body,
                DecodeLevel::nothing(),
            )
            .unwrap();

        assert_eq!(output, SIMPLE_FRAME)
    }

    #[test]
    fn formats_exception_with_high_bit_set() {
        let mut writer = FrameWriter::tcp();
        let header = FrameHeader::new_tcp_header(
            FrameDestination::new(UnitId::new(42)),
            TxId::new(7),
        );
        let output = writer
            .format_exception(
                header,
                FunctionField::Exception(FunctionCode::ReadHoldingRegisters),
                crate::exception::ExceptionCode::IllegalDataAddress,
                DecodeLevel::nothing(),
            )
            .unwrap();

        assert_eq!(
            output,
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x2A, 0x83, 0x02]
        )
    }

    #[test]
    fn can_parse_frame_from_stream() {
        let io = Builder::new().read(SIMPLE_FRAME).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::tcp();
        let frame = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap();

        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn can_parse_maximum_size_frame() {
        // maximum ADU length is 253, so max MBAP length value is 254 which is 0xFE
        let header = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFE, 0x2A];
        let payload = &[0xCC; 253];

        let io = Builder::new().read(header).read(payload).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::tcp();
        let frame = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap();

        assert_eq!(frame.payload(), payload.as_ref());
    }

    #[test]
    fn can_parse_frame_if_segmented_in_header() {
        test_segmented_parse(4);
    }

    #[test]
    fn can_parse_frame_if_segmented_in_payload() {
        test_segmented_parse(8);
    }

    #[test]
    fn errors_on_bad_protocol_id() {
        let frame = &[0x00, 0x07, 0xCA, 0xFE, 0x00, 0x01, 0x2A];
        assert_eq!(
            test_error(frame),
            RequestError::BadFrame(FrameParseError::UnknownProtocolId(0xCAFE))
        );
    }

    #[test]
    fn errors_on_length_of_zero() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert_eq!(
            test_error(frame),
            RequestError::BadFrame(FrameParseError::MbapLengthZero)
        );
    }

    #[test]
    fn errors_when_mbap_length_too_big() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFF, 0x2A];
        assert_eq!(
            test_error(frame),
            RequestError::BadFrame(FrameParseError::MbapLengthTooBig(
                0xFF,
                constants::MAX_LENGTH_FIELD
            ))
        );
    }
}
