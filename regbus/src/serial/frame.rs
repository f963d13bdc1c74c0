use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameDestination, FrameHeader};
use crate::common::function::FunctionCode;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
pub(crate) const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(FrameDestination, usize), // destination, length of rest
    ReadToOffsetForLength(FrameDestination, usize), // destination, length to length
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// The length is always the same (without function code)
    Fixed(usize),
    /// You need to read X more bytes. The last byte contains the number of extra bytes to read after that
    Offset(usize),
    /// Unknown function code, can't determine the size
    Unknown,
}

pub(crate) struct RtuParser {
    state: ParseState,
}

impl RtuParser {
    pub(crate) fn new_request_parser() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    // Returns how to calculate the length of the request body
    fn length_mode(function_code: u8) -> LengthMode {
        let function_code = match FunctionCode::get(function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match function_code {
            FunctionCode::ReadCoils => LengthMode::Fixed(4),
            FunctionCode::ReadDiscreteInputs => LengthMode::Fixed(4),
            FunctionCode::ReadHoldingRegisters => LengthMode::Fixed(4),
            FunctionCode::ReadInputRegisters => LengthMode::Fixed(4),
            FunctionCode::WriteSingleCoil => LengthMode::Fixed(4),
            FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
            FunctionCode::WriteMultipleCoils => LengthMode::Offset(5),
            FunctionCode::WriteMultipleRegisters => LengthMode::Offset(5),
        }
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.read_u8()?);
                let destination = FrameDestination::new(unit_id);

                if unit_id.is_rtu_reserved() {
                    tracing::warn!(
                        "received reserved unit ID {}, violating the Modbus RTU spec. Passing it through nevertheless.",
                        unit_id
                    );
                }

                // We don't consume the function code to avoid an unnecessary copy of the receive buffer later on
                let raw_function_code = cursor.peek_at(0)?;

                self.state = match Self::length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(destination, length),
                    LengthMode::Offset(offset) => {
                        ParseState::ReadToOffsetForLength(destination, offset)
                    }
                    LengthMode::Unknown => {
                        return Err(RequestError::BadFrame(
                            FrameParseError::UnknownFunctionCode(raw_function_code),
                        ))
                    }
                };

                self.parse(cursor, decode_level)
            }
            ParseState::ReadToOffsetForLength(destination, offset) => {
                if cursor.len() < constants::FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                // Get the complete size
                let extra_bytes_to_read =
                    cursor.peek_at(constants::FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(destination, offset + extra_bytes_to_read);

                self.parse(cursor, decode_level)
            }
            ParseState::ReadFullBody(destination, length) => {
                if constants::FUNCTION_CODE_LENGTH + length
                    > crate::common::frame::constants::MAX_ADU_LENGTH
                {
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        constants::FUNCTION_CODE_LENGTH + length,
                        crate::common::frame::constants::MAX_ADU_LENGTH,
                    )));
                }

                if cursor.len() < constants::FUNCTION_CODE_LENGTH + length + constants::CRC_LENGTH {
                    return Ok(None);
                }

                let frame = {
                    let data = cursor.read(constants::FUNCTION_CODE_LENGTH + length)?;
                    let mut frame = Frame::new(FrameHeader::new_rtu_header(destination));
                    frame.set(data);
                    frame
                };
                let received_crc = cursor.read_u16_le()?;

                // Calculate CRC
                let expected_crc = {
                    let mut digest = CRC.digest();
                    digest.update(&[destination.value()]);
                    digest.update(frame.payload());
                    digest.finalize()
                };

                // Check CRC
                if received_crc != expected_crc {
                    return Err(RequestError::BadFrame(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc),
                    ));
                }

                if decode_level.enabled() {
                    tracing::info!(
                        "RTU RX - dest: {} crc: {:#06X} {}",
                        destination,
                        received_crc,
                        crate::common::frame::FramePayloadDisplay::new(
                            decode_level,
                            frame.payload()
                        )
                    );
                }

                self.state = ParseState::Start;
                Ok(Some(frame))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
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

    use super::*;

    const UNIT_ID: u8 = 0x2A;

    const READ_COILS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x01,    // function code
        0x00, 0x10, // starting address
        0x00, 0x13, // qty of outputs
        0x7A, 0x19, // crc
    ];

    const READ_DISCRETE_INPUTS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x02,    // function code
        0x00, 0x10, // starting address
        0x00, 0x13, // qty of inputs
        0x3E, 0x19, // crc
    ];

    const READ_HOLDING_REGISTERS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x03,    // function code
        0x00, 0x10, // starting address
        0x00, 0x03, // qty of registers
        0x02, 0x15, // crc
    ];

    const READ_INPUT_REGISTERS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x04,    // function code
        0x00, 0x10, // starting address
        0x00, 0x03, // qty of registers
        0xB7, 0xD5, // crc
    ];

    const WRITE_SINGLE_COIL_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x05,    // function code
        0x00, 0x10, // output address
        0xFF, 0x00, // output value
        0x8B, 0xE4, // crc
    ];

    const WRITE_SINGLE_REGISTER_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x06,    // function code
        0x00, 0x10, // output address
        0x12, 0x34, // output value
        0x83, 0x63, // crc
    ];

    const WRITE_MULTIPLE_COILS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x0F,    // function code
        0x00, 0x10, // starting address
        0x00, 0x0A, // qty of outputs
        0x02, // byte count
        0x12, 0x34, // output values
        0x00, 0x2E, // crc
    ];

    const WRITE_MULTIPLE_REGISTERS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x10,    // function code
        0x00, 0x10, // starting address
        0x00, 0x02, // qty of registers
        0x04, // byte count
        0x12, 0x34, 0x56, 0x78, // register values
        0x07, 0x73, // crc
    ];

    const ALL_REQUESTS: &[&[u8]] = &[
        READ_COILS_REQUEST,
        READ_DISCRETE_INPUTS_REQUEST,
        READ_HOLDING_REGISTERS_REQUEST,
        READ_INPUT_REGISTERS_REQUEST,
        WRITE_SINGLE_COIL_REQUEST,
        WRITE_SINGLE_REGISTER_REQUEST,
        WRITE_MULTIPLE_COILS_REQUEST,
        WRITE_MULTIPLE_REGISTERS_REQUEST,
    ];

    fn parse_frame(reader: &mut FramedReader, frame: &[u8]) -> Frame {
        let io = Builder::new().read(frame).build();
        let mut phys = PhysLayer::new_mock(io);
        block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap()
    }

    fn assert_can_parse_frame(frame: &[u8]) {
        let mut reader = FramedReader::rtu_request();
        let received = parse_frame(&mut reader, frame);
        assert_eq!(received.header.tx_id, None);
        assert_eq!(
            received.header.destination,
            FrameDestination::new(UnitId::new(UNIT_ID))
        );
        assert_eq!(
            received.payload(),
            &frame[1..frame.len() - constants::CRC_LENGTH]
        );
    }

    #[test]
    fn can_parse_request_frames() {
        for request in ALL_REQUESTS {
            assert_can_parse_frame(request);
        }
    }

    #[test]
    fn can_parse_request_frames_byte_per_byte() {
        for request in ALL_REQUESTS {
            let mut builder = Builder::new();
            for byte in request.iter() {
                builder.read(&[*byte]);
            }
            let mut phys = PhysLayer::new_mock(builder.build());
            let mut reader = FramedReader::rtu_request();
            let received =
                block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap();
            assert_eq!(
                received.payload(),
                &request[1..request.len() - constants::CRC_LENGTH]
            );
        }
    }

    #[test]
    fn can_parse_two_request_frames_back_to_back() {
        for request in ALL_REQUESTS {
            let duplicate: Vec<u8> = request.iter().chain(request.iter()).copied().collect();
            let io = Builder::new().read(duplicate.as_slice()).build();
            let mut phys = PhysLayer::new_mock(io);
            let mut reader = FramedReader::rtu_request();

            for _ in 0..2 {
                let received =
                    block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap();
                assert_eq!(
                    received.payload(),
                    &request[1..request.len() - constants::CRC_LENGTH]
                );
            }
        }
    }

    #[test]
    fn broadcast_unit_id_parses_as_broadcast_destination() {
        let mut frame = vec![
            0x00, // broadcast unit id
            0x05, // function code
            0x00, 0x10, // output address
            0xFF, 0x00, // output value
        ];
        let crc = CRC.checksum(&frame);
        frame.push(crc as u8);
        frame.push((crc >> 8) as u8);

        let mut reader = FramedReader::rtu_request();
        let received = parse_frame(&mut reader, &frame);
        assert!(received.header.destination.is_broadcast());
    }

    #[test]
    fn fails_on_wrong_crc() {
        const READ_COILS_REQUEST_WRONG_CRC: &[u8] = &[
            UNIT_ID, // unit id
            0x01,    // function code
            0x00, 0x10, // starting address
            0x00, 0x13, // qty of outputs
            0xFF, 0xFF, // wrong crc
        ];

        let io = Builder::new().read(READ_COILS_REQUEST_WRONG_CRC).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::rtu_request();
        let err = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing()))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RequestError::BadFrame(FrameParseError::CrcValidationFailure(0xFFFF, _))
        ));
    }

    #[test]
    fn recovers_after_crc_failure_when_reset() {
        const CORRUPT: &[u8] = &[
            UNIT_ID, 0x01, 0x00, 0x10, 0x00, 0x13, 0xFF, 0xFF, // wrong crc
        ];

        let io = Builder::new().read(CORRUPT).read(READ_COILS_REQUEST).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::rtu_request();

        let err = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing()));
        assert!(err.is_err());

        reader.reset();

        let frame = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing())).unwrap();
        assert_eq!(
            frame.payload(),
            &READ_COILS_REQUEST[1..READ_COILS_REQUEST.len() - constants::CRC_LENGTH]
        );
    }

    #[test]
    fn fails_on_unknown_function_code() {
        let frame = &[UNIT_ID, 0x2B, 0x00, 0x00];
        let io = Builder::new().read(frame).build();
        let mut phys = PhysLayer::new_mock(io);
        let mut reader = FramedReader::rtu_request();
        let err = block_on(reader.next_frame(&mut phys, DecodeLevel::nothing()))
            .err()
            .unwrap();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::UnknownFunctionCode(0x2B))
        );
    }

    struct RawBody<'a> {
        body: &'a [u8],
    }

    impl<'a> Serialize for RawBody<'a> {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            for byte in self.body {
                cursor.write_u8(*byte)?;
            }
            Ok(())
        }
    }

    #[test]
    fn can_format_rtu_frames_with_correct_crc() {
        for request in ALL_REQUESTS {
            let function = FunctionCode::get(request[1]).unwrap();
            let body = RawBody {
                body: &request[2..request.len() - constants::CRC_LENGTH],
            };
            let mut writer = FrameWriter::rtu();
            let output = writer
                .format_reply(
                    FrameHeader::new_rtu_header(FrameDestination::new(UnitId::new(UNIT_ID))),
                    function,
                    &body,
                    DecodeLevel::nothing(),
                )
                .unwrap();
            assert_eq!(output, *request);
        }
    }

    #[test]
    fn formats_exception_frames() {
        let mut writer = FrameWriter::rtu();
        let output = writer
            .format_exception(
                FrameHeader::new_rtu_header(FrameDestination::new(UnitId::new(UNIT_ID))),
                FunctionField::Exception(FunctionCode::ReadCoils),
                crate::exception::ExceptionCode::IllegalDataAddress,
                DecodeLevel::nothing(),
            )
            .unwrap();

        // validate the envelope by running it through the CRC again
        let crc = CRC.checksum(&output[..output.len() - constants::CRC_LENGTH]);
        assert_eq!(&output[..2], &[UNIT_ID, 0x81]);
        assert_eq!(output[2], 0x02);
        assert_eq!(output[3], crc as u8);
        assert_eq!(output[4], (crc >> 8) as u8);
    }
}
