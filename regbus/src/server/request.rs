use crate::common::bits::num_bytes_for_bits;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::frame::{FrameHeader, FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::traits::{Parse, Serialize};
use crate::decode::{AppDecodeLevel, DecodeLevel};
use crate::error::{AduParseError, InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::server::database::Database;
use crate::server::response::{Bits, Registers};
use crate::server::types::{WriteCoils, WriteRegisters};
use crate::types::{
    AddressRange, BitIterator, BitIteratorDisplay, Indexed, ReadBitsRange, ReadRegistersRange,
    RegisterIterator, RegisterIteratorDisplay,
};

/// A fully parsed request PDU, borrowing payload bytes from the frame
#[derive(Debug)]
pub(crate) enum Request<'a> {
    ReadCoils(ReadBitsRange),
    ReadDiscreteInputs(ReadBitsRange),
    ReadHoldingRegisters(ReadRegistersRange),
    ReadInputRegisters(ReadRegistersRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteCoils<'a>),
    WriteMultipleRegisters(WriteRegisters<'a>),
}

/// All requests that support broadcast
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub(crate) enum BroadcastRequest<'a> {
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteCoils<'a>),
    WriteMultipleRegisters(WriteRegisters<'a>),
}

impl<'a> BroadcastRequest<'a> {
    // execute a broadcast request against a single device, discarding the result
    pub(crate) fn execute(&self, database: &mut Database) {
        match self {
            BroadcastRequest::WriteSingleCoil(x) => {
                let _ = database.write_single_coil(*x);
            }
            BroadcastRequest::WriteSingleRegister(x) => {
                let _ = database.write_single_register(*x);
            }
            BroadcastRequest::WriteMultipleCoils(x) => {
                let _ = database.write_multiple_coils(*x);
            }
            BroadcastRequest::WriteMultipleRegisters(x) => {
                let _ = database.write_multiple_registers(*x);
            }
        }
    }
}

impl<'a> Request<'a> {
    pub(crate) fn get_function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub(crate) fn into_broadcast_request(self) -> Option<BroadcastRequest<'a>> {
        match self {
            Request::ReadCoils(_) => None,
            Request::ReadDiscreteInputs(_) => None,
            Request::ReadHoldingRegisters(_) => None,
            Request::ReadInputRegisters(_) => None,
            Request::WriteSingleCoil(x) => Some(BroadcastRequest::WriteSingleCoil(x)),
            Request::WriteSingleRegister(x) => Some(BroadcastRequest::WriteSingleRegister(x)),
            Request::WriteMultipleCoils(x) => Some(BroadcastRequest::WriteMultipleCoils(x)),
            Request::WriteMultipleRegisters(x) => Some(BroadcastRequest::WriteMultipleRegisters(x)),
        }
    }

    /// Execute the request against the addressed device and format either the
    /// normal or the exception response into the writer's buffer.
    pub(crate) fn get_reply<'b>(
        &self,
        header: FrameHeader,
        database: &mut Database,
        writer: &'b mut FrameWriter,
        level: DecodeLevel,
    ) -> Result<&'b [u8], RequestError> {
        fn write_result<'b, T>(
            function: FunctionCode,
            header: FrameHeader,
            writer: &'b mut FrameWriter,
            result: Result<T, ExceptionCode>,
            level: DecodeLevel,
        ) -> Result<&'b [u8], RequestError>
        where
            T: Serialize,
        {
            match result {
                Ok(response) => writer.format_reply(header, function, &response, level),
                Err(ex) => {
                    writer.format_exception(header, FunctionField::Exception(function), ex, level)
                }
            }
        }

        let function = self.get_function();

        match self {
            Request::ReadCoils(range) => match database.read_coils(range.get()) {
                Ok(values) => writer.format_reply(header, function, &Bits::new(values), level),
                Err(ex) => {
                    writer.format_exception(header, FunctionField::Exception(function), ex, level)
                }
            },
            Request::ReadDiscreteInputs(range) => {
                match database.read_discrete_inputs(range.get()) {
                    Ok(values) => writer.format_reply(header, function, &Bits::new(values), level),
                    Err(ex) => writer.format_exception(
                        header,
                        FunctionField::Exception(function),
                        ex,
                        level,
                    ),
                }
            }
            Request::ReadHoldingRegisters(range) => {
                match database.read_holding_registers(range.get()) {
                    Ok(values) => {
                        writer.format_reply(header, function, &Registers::new(values), level)
                    }
                    Err(ex) => writer.format_exception(
                        header,
                        FunctionField::Exception(function),
                        ex,
                        level,
                    ),
                }
            }
            Request::ReadInputRegisters(range) => {
                match database.read_input_registers(range.get()) {
                    Ok(values) => {
                        writer.format_reply(header, function, &Registers::new(values), level)
                    }
                    Err(ex) => writer.format_exception(
                        header,
                        FunctionField::Exception(function),
                        ex,
                        level,
                    ),
                }
            }
            Request::WriteSingleCoil(request) => {
                // the reply echoes the request on success
                let result = database.write_single_coil(*request).map(|_| *request);
                write_result(function, header, writer, result, level)
            }
            Request::WriteSingleRegister(request) => {
                let result = database.write_single_register(*request).map(|_| *request);
                write_result(function, header, writer, result, level)
            }
            Request::WriteMultipleCoils(items) => {
                let result = database.write_multiple_coils(*items).map(|_| items.range);
                write_result(function, header, writer, result, level)
            }
            Request::WriteMultipleRegisters(items) => {
                let result = database
                    .write_multiple_registers(*items)
                    .map(|_| items.range);
                write_result(function, header, writer, result, level)
            }
        }
    }

    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        match function {
            FunctionCode::ReadCoils => {
                let x = Request::ReadCoils(AddressRange::parse(cursor)?.of_read_bits()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadDiscreteInputs => {
                let x = Request::ReadDiscreteInputs(AddressRange::parse(cursor)?.of_read_bits()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadHoldingRegisters => {
                let x = Request::ReadHoldingRegisters(
                    AddressRange::parse(cursor)?.of_read_registers()?,
                );
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadInputRegisters => {
                let x =
                    Request::ReadInputRegisters(AddressRange::parse(cursor)?.of_read_registers()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteSingleCoil => {
                let x = Request::WriteSingleCoil(Indexed::<bool>::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteSingleRegister => {
                let x = Request::WriteSingleRegister(Indexed::<u16>::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteMultipleCoils => {
                let range = AddressRange::parse(cursor)?.of_write_bits()?;
                let byte_count = cursor.read_u8()? as usize;
                let expected = num_bytes_for_bits(range.count);
                if byte_count != expected {
                    return Err(AduParseError::MismatchedByteCount(expected, byte_count).into());
                }
                Ok(Request::WriteMultipleCoils(WriteCoils::new(
                    range,
                    BitIterator::parse_all(range, cursor)?,
                )))
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = AddressRange::parse(cursor)?.of_write_registers()?;
                let byte_count = cursor.read_u8()? as usize;
                let expected = 2 * (range.count as usize);
                if byte_count != expected {
                    return Err(AduParseError::MismatchedByteCount(expected, byte_count).into());
                }
                Ok(Request::WriteMultipleRegisters(WriteRegisters::new(
                    range,
                    RegisterIterator::parse_all(range, cursor)?,
                )))
            }
        }
    }

    /// Serialize the complete request PDU (function code + body)
    ///
    /// The inverse of `parse`; this is what a client-side encoder emits and
    /// what makes the codec testable as an identity.
    pub(crate) fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.get_function().get_value())?;
        match self {
            Request::ReadCoils(range) => range.get().serialize(cursor),
            Request::ReadDiscreteInputs(range) => range.get().serialize(cursor),
            Request::ReadHoldingRegisters(range) => range.get().serialize(cursor),
            Request::ReadInputRegisters(range) => range.get().serialize(cursor),
            Request::WriteSingleCoil(request) => request.serialize(cursor),
            Request::WriteSingleRegister(request) => request.serialize(cursor),
            Request::WriteMultipleCoils(items) => {
                items.range.serialize(cursor)?;
                let byte_count = num_bytes_for_bits(items.range.count);
                let byte_count = u8::try_from(byte_count)
                    .map_err(|_| InternalError::BadByteCount(byte_count))?;
                cursor.write_u8(byte_count)?;

                let mut acc: u8 = 0;
                let mut num_bits: usize = 0;
                for bit in items.iterator {
                    if bit.value {
                        acc |= 1 << num_bits;
                    }
                    num_bits += 1;
                    if num_bits == 8 {
                        cursor.write_u8(acc)?;
                        acc = 0;
                        num_bits = 0;
                    }
                }
                if num_bits > 0 {
                    cursor.write_u8(acc)?;
                }
                Ok(())
            }
            Request::WriteMultipleRegisters(items) => {
                items.range.serialize(cursor)?;
                let byte_count = 2 * (items.range.count as usize);
                let byte_count = u8::try_from(byte_count)
                    .map_err(|_| InternalError::BadByteCount(byte_count))?;
                cursor.write_u8(byte_count)?;
                for register in items.iterator {
                    cursor.write_u16_be(register.value)?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) struct RequestDisplay<'a, 'b> {
    request: &'a Request<'b>,
    level: AppDecodeLevel,
}

impl<'a, 'b> RequestDisplay<'a, 'b> {
    pub(crate) fn new(level: AppDecodeLevel, request: &'a Request<'b>) -> Self {
        Self { request, level }
    }
}

impl std::fmt::Display for RequestDisplay<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.request.get_function())?;

        if self.level.data_headers() {
            match self.request {
                Request::ReadCoils(range) => {
                    write!(f, " {}", range.get())?;
                }
                Request::ReadDiscreteInputs(range) => {
                    write!(f, " {}", range.get())?;
                }
                Request::ReadHoldingRegisters(range) => {
                    write!(f, " {}", range.get())?;
                }
                Request::ReadInputRegisters(range) => {
                    write!(f, " {}", range.get())?;
                }
                Request::WriteSingleCoil(request) => {
                    write!(f, " {request}")?;
                }
                Request::WriteSingleRegister(request) => {
                    write!(f, " {request}")?;
                }
                Request::WriteMultipleCoils(items) => {
                    write!(f, " {}", BitIteratorDisplay::new(self.level, items.iterator))?;
                }
                Request::WriteMultipleRegisters(items) => {
                    write!(
                        f,
                        " {}",
                        RegisterIteratorDisplay::new(self.level, items.iterator)
                    )?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pdu(pdu: &[u8]) -> Result<(), RequestError> {
        let mut cursor = ReadCursor::new(pdu);
        let raw_function = cursor.read_u8().unwrap();
        let function = FunctionCode::get(raw_function).unwrap();
        Request::parse(function, &mut cursor).map(|_| ())
    }

    fn serialize_pdu(request: &Request) -> Vec<u8> {
        let mut buffer = [0u8; 256];
        let mut cursor = WriteCursor::new(&mut buffer);
        request.serialize(&mut cursor).unwrap();
        let end = cursor.position();
        buffer[..end].to_vec()
    }

    /// encode → decode → encode must reproduce the original bytes
    fn assert_encode_decode_identity(pdu: &[u8]) {
        let mut cursor = ReadCursor::new(pdu);
        let function = FunctionCode::get(cursor.read_u8().unwrap()).unwrap();
        let request = Request::parse(function, &mut cursor).unwrap();
        assert_eq!(serialize_pdu(&request), pdu);
    }

    #[test]
    fn encode_decode_is_identity_for_every_supported_function_code() {
        let pdus: &[&[u8]] = &[
            &[0x01, 0x00, 0x10, 0x00, 0x13],                   // read coils
            &[0x02, 0x00, 0x10, 0x00, 0x13],                   // read discrete inputs
            &[0x03, 0x00, 0x10, 0x00, 0x7D],                   // read holding registers, max count
            &[0x04, 0x00, 0x00, 0x00, 0x01],                   // read input registers, min count
            &[0x05, 0x00, 0x10, 0xFF, 0x00],                   // write single coil on
            &[0x05, 0x00, 0x10, 0x00, 0x00],                   // write single coil off
            &[0x06, 0x00, 0x10, 0x12, 0x34],                   // write single register
            &[0x0F, 0x00, 0x10, 0x00, 0x0A, 0x02, 0x12, 0x02], // write multiple coils
            &[0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78], // write multiple registers
        ];

        for pdu in pdus {
            assert_encode_decode_identity(pdu);
        }
    }

    #[test]
    fn rejects_trailing_bytes_on_read_requests() {
        assert_eq!(
            parse_pdu(&[0x01, 0x00, 0x10, 0x00, 0x13, 0xFF]),
            Err(AduParseError::TrailingBytes(1).into())
        );
    }

    #[test]
    fn rejects_count_of_zero_on_read_requests() {
        assert_eq!(
            parse_pdu(&[0x03, 0x00, 0x10, 0x00, 0x00]),
            Err(crate::error::InvalidRange::CountOfZero.into())
        );
    }

    #[test]
    fn rejects_read_count_above_the_per_type_limit() {
        assert_eq!(
            parse_pdu(&[0x03, 0x00, 0x00, 0x00, 0x7E]),
            Err(crate::error::InvalidRange::CountTooLargeForType(0x7E, 0x7D).into())
        );
    }

    #[test]
    fn rejects_bad_coil_state_on_write_single_coil() {
        assert_eq!(
            parse_pdu(&[0x05, 0x00, 0x10, 0xAB, 0xCD]),
            Err(AduParseError::UnknownCoilState(0xABCD).into())
        );
    }

    mod coils {
        use super::*;

        #[test]
        fn fails_when_byte_count_does_not_match_quantity() {
            // 8 coils require 1 byte, 2 declared
            assert_eq!(
                parse_pdu(&[0x0F, 0x00, 0x01, 0x00, 0x08, 0x02, 0xFF, 0xFF]),
                Err(AduParseError::MismatchedByteCount(1, 2).into())
            );
        }

        #[test]
        fn fails_when_specified_byte_count_not_present() {
            assert_eq!(
                parse_pdu(&[0x0F, 0x00, 0x01, 0x00, 0x08, 0x01]),
                Err(AduParseError::InsufficientBytes.into())
            );
        }

        #[test]
        fn fails_when_too_many_bytes_present() {
            assert_eq!(
                parse_pdu(&[0x0F, 0x00, 0x01, 0x00, 0x03, 0x01, 0x05, 0xFF]),
                Err(AduParseError::TrailingBytes(1).into())
            );
        }

        #[test]
        fn can_parse_coils() {
            let pdu = &[0x0F, 0x00, 0x01, 0x00, 0x03, 0x01, 0x05];
            let mut cursor = ReadCursor::new(&pdu[1..]);
            let coils = match Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor).unwrap()
            {
                Request::WriteMultipleCoils(write) => write,
                _ => panic!("bad match"),
            };

            assert_eq!(coils.range, AddressRange::try_from(1, 3).unwrap());
            assert_eq!(
                coils.iterator.collect::<Vec<Indexed<bool>>>(),
                vec![
                    Indexed::new(1, true),
                    Indexed::new(2, false),
                    Indexed::new(3, true)
                ]
            )
        }
    }

    mod registers {
        use super::*;

        #[test]
        fn fails_when_byte_count_does_not_match_quantity() {
            // 1 register requires 2 bytes, 3 declared
            assert_eq!(
                parse_pdu(&[0x10, 0x00, 0x01, 0x00, 0x01, 0x03, 0xFF, 0xFF, 0xFF]),
                Err(AduParseError::MismatchedByteCount(2, 3).into())
            );
        }

        #[test]
        fn fails_when_specified_byte_count_not_present() {
            assert_eq!(
                parse_pdu(&[0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0xFF]),
                Err(AduParseError::InsufficientBytes.into())
            );
        }

        #[test]
        fn fails_when_too_many_bytes_present() {
            assert_eq!(
                parse_pdu(&[0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0xFF, 0xFF, 0xFF]),
                Err(AduParseError::TrailingBytes(1).into())
            );
        }

        #[test]
        fn can_parse_registers() {
            let pdu = &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0xCA, 0xFE, 0xBB, 0xDD];
            let mut cursor = ReadCursor::new(&pdu[1..]);
            let registers =
                match Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor).unwrap() {
                    Request::WriteMultipleRegisters(write) => write,
                    _ => panic!("bad match"),
                };

            assert_eq!(registers.range, AddressRange::try_from(1, 2).unwrap());
            assert_eq!(
                registers.iterator.collect::<Vec<Indexed<u16>>>(),
                vec![Indexed::new(1, 0xCAFE), Indexed::new(2, 0xBBDD)]
            )
        }
    }
}
