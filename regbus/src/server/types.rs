use crate::types::{AddressRange, BitIterator, RegisterIterator};

/// Request to write coils received by the server
#[derive(Debug, Copy, Clone)]
pub(crate) struct WriteCoils<'a> {
    /// address range of the request
    pub(crate) range: AddressRange,
    /// lazy iterator over the coil values to write
    pub(crate) iterator: BitIterator<'a>,
}

impl<'a> WriteCoils<'a> {
    pub(crate) fn new(range: AddressRange, iterator: BitIterator<'a>) -> Self {
        Self { range, iterator }
    }
}

/// Request to write registers received by the server
#[derive(Debug, Copy, Clone)]
pub(crate) struct WriteRegisters<'a> {
    /// address range of the request
    pub(crate) range: AddressRange,
    /// lazy iterator over the register values to write
    pub(crate) iterator: RegisterIterator<'a>,
}

impl<'a> WriteRegisters<'a> {
    pub(crate) fn new(range: AddressRange, iterator: RegisterIterator<'a>) -> Self {
        Self { range, iterator }
    }
}
