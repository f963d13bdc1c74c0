use crate::constants::limits;
use crate::error::AccessError;
use crate::exception::ExceptionCode;
use crate::server::types::{WriteCoils, WriteRegisters};
use crate::types::{AddressRange, Indexed, WordOrder};

/// Per-table cell counts and conventions of a single slave device
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceConfig {
    /// Number of coils (read/write bits)
    pub coils: u16,
    /// Number of discrete inputs (read-only bits)
    pub discrete_inputs: u16,
    /// Number of input registers (read-only 16-bit words)
    pub input_registers: u16,
    /// Number of holding registers (read/write 16-bit words)
    pub holding_registers: u16,
    /// Word order used by the 32-bit accessors of this device
    pub word_order: WordOrder,
}

impl DeviceConfig {
    /// Create a configuration with the default word order ("abcd")
    pub fn new(
        coils: u16,
        discrete_inputs: u16,
        input_registers: u16,
        holding_registers: u16,
    ) -> Self {
        Self {
            coils,
            discrete_inputs,
            input_registers,
            holding_registers,
            word_order: WordOrder::default(),
        }
    }

    /// Override the word order used by the 32-bit accessors
    pub fn with_word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }
}

/// Typed register storage of a single slave
///
/// Wire-facing operations use protocol (0-based) addressing and fail with the
/// exception code that goes into the response. Application-facing operations
/// use 1-based register numbers like the embedding API.
pub(crate) struct Database {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    input_registers: Vec<u16>,
    holding_registers: Vec<u16>,
    word_order: WordOrder,
}

impl Database {
    pub(crate) fn new(config: DeviceConfig) -> Self {
        Self {
            coils: vec![false; config.coils as usize],
            discrete_inputs: vec![false; config.discrete_inputs as usize],
            input_registers: vec![0; config.input_registers as usize],
            holding_registers: vec![0; config.holding_registers as usize],
            word_order: config.word_order,
        }
    }

    fn get_range_of<T>(slice: &[T], range: AddressRange) -> Result<&[T], ExceptionCode> {
        let std_range = range.to_std_range();
        if std_range.end > slice.len() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(&slice[std_range])
    }

    fn get_mut_range_of<T>(
        slice: &mut [T],
        range: AddressRange,
    ) -> Result<&mut [T], ExceptionCode> {
        let std_range = range.to_std_range();
        if std_range.end > slice.len() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(&mut slice[std_range])
    }

    // ------- wire-facing operations, 0-based addressing -------

    pub(crate) fn read_coils(&self, range: AddressRange) -> Result<&[bool], ExceptionCode> {
        Self::get_range_of(&self.coils, range)
    }

    pub(crate) fn read_discrete_inputs(
        &self,
        range: AddressRange,
    ) -> Result<&[bool], ExceptionCode> {
        Self::get_range_of(&self.discrete_inputs, range)
    }

    pub(crate) fn read_holding_registers(
        &self,
        range: AddressRange,
    ) -> Result<&[u16], ExceptionCode> {
        Self::get_range_of(&self.holding_registers, range)
    }

    pub(crate) fn read_input_registers(
        &self,
        range: AddressRange,
    ) -> Result<&[u16], ExceptionCode> {
        Self::get_range_of(&self.input_registers, range)
    }

    pub(crate) fn write_single_coil(&mut self, value: Indexed<bool>) -> Result<(), ExceptionCode> {
        match self.coils.get_mut(value.index as usize) {
            Some(cell) => {
                *cell = value.value;
                Ok(())
            }
            None => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    pub(crate) fn write_single_register(
        &mut self,
        value: Indexed<u16>,
    ) -> Result<(), ExceptionCode> {
        match self.holding_registers.get_mut(value.index as usize) {
            Some(cell) => {
                *cell = value.value;
                Ok(())
            }
            None => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    /// The whole range is validated before the first cell is touched, so a
    /// failed write never leaves the table partially updated.
    pub(crate) fn write_multiple_coils(&mut self, values: WriteCoils) -> Result<(), ExceptionCode> {
        let cells = Self::get_mut_range_of(&mut self.coils, values.range)?;
        for (cell, bit) in cells.iter_mut().zip(values.iterator) {
            *cell = bit.value;
        }
        Ok(())
    }

    pub(crate) fn write_multiple_registers(
        &mut self,
        values: WriteRegisters,
    ) -> Result<(), ExceptionCode> {
        let cells = Self::get_mut_range_of(&mut self.holding_registers, values.range)?;
        for (cell, register) in cells.iter_mut().zip(values.iterator) {
            *cell = register.value;
        }
        Ok(())
    }

    // ------- application-facing operations, 1-based register numbers -------

    fn app_range(number: u16, count: u16, limit: u16) -> Result<AddressRange, AccessError> {
        if number == 0 {
            return Err(AccessError::OutOfRange);
        }
        if count == 0 || count > limit {
            return Err(AccessError::InvalidCount);
        }
        AddressRange::try_from(number - 1, count).map_err(|_| AccessError::OutOfRange)
    }

    fn app_read<T: Copy>(
        slice: &[T],
        number: u16,
        count: u16,
        limit: u16,
    ) -> Result<&[T], AccessError> {
        let range = Self::app_range(number, count, limit)?;
        Self::get_range_of(slice, range).map_err(|_| AccessError::OutOfRange)
    }

    fn app_write<T: Copy>(
        slice: &mut [T],
        number: u16,
        values: &[T],
        limit: u16,
    ) -> Result<(), AccessError> {
        let count = u16::try_from(values.len()).map_err(|_| AccessError::InvalidCount)?;
        let range = Self::app_range(number, count, limit)?;
        let cells = Self::get_mut_range_of(slice, range).map_err(|_| AccessError::OutOfRange)?;
        cells.copy_from_slice(values);
        Ok(())
    }

    pub(crate) fn read_coil(&self, number: u16) -> Result<bool, AccessError> {
        Self::app_read(&self.coils, number, 1, limits::MAX_READ_COILS_COUNT).map(|x| x[0])
    }

    pub(crate) fn write_coil(&mut self, number: u16, value: bool) -> Result<(), AccessError> {
        Self::app_write(&mut self.coils, number, &[value], limits::MAX_WRITE_COILS_COUNT)
    }

    pub(crate) fn read_discrete_input(&self, number: u16) -> Result<bool, AccessError> {
        Self::app_read(&self.discrete_inputs, number, 1, limits::MAX_READ_COILS_COUNT)
            .map(|x| x[0])
    }

    pub(crate) fn write_discrete_input(
        &mut self,
        number: u16,
        value: bool,
    ) -> Result<(), AccessError> {
        Self::app_write(
            &mut self.discrete_inputs,
            number,
            &[value],
            limits::MAX_WRITE_COILS_COUNT,
        )
    }

    pub(crate) fn read_register(&self, number: u16) -> Result<u16, AccessError> {
        Self::app_read(
            &self.holding_registers,
            number,
            1,
            limits::MAX_READ_REGISTERS_COUNT,
        )
        .map(|x| x[0])
    }

    pub(crate) fn read_registers(&self, number: u16, count: u16) -> Result<Vec<u16>, AccessError> {
        Self::app_read(
            &self.holding_registers,
            number,
            count,
            limits::MAX_READ_REGISTERS_COUNT,
        )
        .map(|x| x.to_vec())
    }

    pub(crate) fn write_register(&mut self, number: u16, value: u16) -> Result<(), AccessError> {
        Self::app_write(
            &mut self.holding_registers,
            number,
            &[value],
            limits::MAX_WRITE_REGISTERS_COUNT,
        )
    }

    pub(crate) fn write_registers(&mut self, number: u16, values: &[u16]) -> Result<(), AccessError> {
        Self::app_write(
            &mut self.holding_registers,
            number,
            values,
            limits::MAX_WRITE_REGISTERS_COUNT,
        )
    }

    pub(crate) fn read_input_register(&self, number: u16) -> Result<u16, AccessError> {
        Self::app_read(
            &self.input_registers,
            number,
            1,
            limits::MAX_READ_REGISTERS_COUNT,
        )
        .map(|x| x[0])
    }

    pub(crate) fn read_input_registers_app(
        &self,
        number: u16,
        count: u16,
    ) -> Result<Vec<u16>, AccessError> {
        Self::app_read(
            &self.input_registers,
            number,
            count,
            limits::MAX_READ_REGISTERS_COUNT,
        )
        .map(|x| x.to_vec())
    }

    pub(crate) fn write_input_register(
        &mut self,
        number: u16,
        value: u16,
    ) -> Result<(), AccessError> {
        Self::app_write(
            &mut self.input_registers,
            number,
            &[value],
            limits::MAX_WRITE_REGISTERS_COUNT,
        )
    }

    pub(crate) fn write_input_registers(
        &mut self,
        number: u16,
        values: &[u16],
    ) -> Result<(), AccessError> {
        Self::app_write(
            &mut self.input_registers,
            number,
            values,
            limits::MAX_WRITE_REGISTERS_COUNT,
        )
    }

    pub(crate) fn read_register_u32(&self, number: u16) -> Result<u32, AccessError> {
        let cells = Self::app_read(
            &self.holding_registers,
            number,
            2,
            limits::MAX_READ_REGISTERS_COUNT,
        )?;
        Ok(self.word_order.join(cells[0], cells[1]))
    }

    pub(crate) fn write_register_u32(
        &mut self,
        number: u16,
        value: u32,
    ) -> Result<(), AccessError> {
        let (first, second) = self.word_order.split(value);
        Self::app_write(
            &mut self.holding_registers,
            number,
            &[first, second],
            limits::MAX_WRITE_REGISTERS_COUNT,
        )
    }

    pub(crate) fn read_register_i32(&self, number: u16) -> Result<i32, AccessError> {
        self.read_register_u32(number).map(|value| value as i32)
    }

    pub(crate) fn write_register_i32(
        &mut self,
        number: u16,
        value: i32,
    ) -> Result<(), AccessError> {
        self.write_register_u32(number, value as u32)
    }
}
