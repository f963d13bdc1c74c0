/// Wire representation of coil states in `write single coil` requests
pub mod coil {
    /// u16 representation of COIL == ON when performing write single coil
    pub const ON: u16 = 0xFF00;
    /// u16 representation of COIL == OFF when performing write single coil
    pub const OFF: u16 = 0x0000;
}

/// Per-request quantity limits defined by the Modbus specification
pub mod limits {
    /// Maximum count allowed in a read coils/discrete inputs request
    pub const MAX_READ_COILS_COUNT: u16 = 0x07D0;
    /// Maximum count allowed in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 0x007D;
    /// Maximum count allowed in a `write multiple coils` request
    pub const MAX_WRITE_COILS_COUNT: u16 = 0x07B0;
    /// Maximum count allowed in a `write multiple registers` request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 0x007B;
}

/// Raw values of the Modbus exception codes emitted by the server
pub mod exceptions {
    /// function code not supported by the server
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    /// request address range falls outside the table
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    /// request contains a disallowed quantity or value
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
    /// unrecoverable server-side failure while servicing the request
    pub const SERVER_DEVICE_FAILURE: u8 = 0x04;
}
