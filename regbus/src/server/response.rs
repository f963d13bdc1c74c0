use crate::common::bits::num_bytes_for_bits;
use crate::common::cursor::WriteCursor;
use crate::common::traits::Serialize;
use crate::error::{InternalError, RequestError};

/// Response body of a read coils/discrete inputs request: byte count + packed bits
pub(crate) struct Bits<'a> {
    values: &'a [bool],
}

impl<'a> Bits<'a> {
    pub(crate) fn new(values: &'a [bool]) -> Self {
        Self { values }
    }
}

impl Serialize for Bits<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let byte_count = num_bytes_for_bits(self.values.len() as u16);
        let byte_count =
            u8::try_from(byte_count).map_err(|_| InternalError::BadByteCount(byte_count))?;
        cursor.write_u8(byte_count)?;

        let mut acc: u8 = 0;
        let mut num_bits: usize = 0;
        for bit in self.values {
            if *bit {
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
}

/// Response body of a read holding/input registers request: byte count + big-endian values
pub(crate) struct Registers<'a> {
    values: &'a [u16],
}

impl<'a> Registers<'a> {
    pub(crate) fn new(values: &'a [u16]) -> Self {
        Self { values }
    }
}

impl Serialize for Registers<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let byte_count = 2 * self.values.len();
        let byte_count =
            u8::try_from(byte_count).map_err(|_| InternalError::BadByteCount(byte_count))?;
        cursor.write_u8(byte_count)?;

        for value in self.values {
            cursor.write_u16_be(*value)?;
        }

        Ok(())
    }
}
