use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AccessError;
use crate::server::database::Database;

/// Application-facing accessor for the tables of a single slave device
///
/// All operations address cells by 1-based register number and lock the
/// device only for the duration of the cell copy, so the engine and a
/// multi-threaded embedding application can share a device safely. In the
/// single-threaded usage pattern the lock is always uncontended because the
/// engine only runs inside `poll`.
#[derive(Clone)]
pub struct SlaveHandle {
    database: Arc<Mutex<Database>>,
}

impl SlaveHandle {
    pub(crate) fn new(database: Arc<Mutex<Database>>) -> Self {
        Self { database }
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.database.lock().unwrap()
    }

    /// Read a single coil
    pub fn read_coil(&self, number: u16) -> Result<bool, AccessError> {
        self.lock().read_coil(number)
    }

    /// Write a single coil
    pub fn write_coil(&self, number: u16, value: bool) -> Result<(), AccessError> {
        self.lock().write_coil(number, value)
    }

    /// Read a single discrete input
    pub fn read_discrete_input(&self, number: u16) -> Result<bool, AccessError> {
        self.lock().read_discrete_input(number)
    }

    /// Write a single discrete input
    ///
    /// Discrete inputs are read-only on the wire; this is how the embedding
    /// application feeds them.
    pub fn write_discrete_input(&self, number: u16, value: bool) -> Result<(), AccessError> {
        self.lock().write_discrete_input(number, value)
    }

    /// Read a single holding register
    pub fn read_register(&self, number: u16) -> Result<u16, AccessError> {
        self.lock().read_register(number)
    }

    /// Read `count` consecutive holding registers
    pub fn read_registers(&self, number: u16, count: u16) -> Result<Vec<u16>, AccessError> {
        self.lock().read_registers(number, count)
    }

    /// Write a single holding register
    pub fn write_register(&self, number: u16, value: u16) -> Result<(), AccessError> {
        self.lock().write_register(number, value)
    }

    /// Write consecutive holding registers, atomically per call
    pub fn write_registers(&self, number: u16, values: &[u16]) -> Result<(), AccessError> {
        self.lock().write_registers(number, values)
    }

    /// Read a single input register
    pub fn read_input_register(&self, number: u16) -> Result<u16, AccessError> {
        self.lock().read_input_register(number)
    }

    /// Read `count` consecutive input registers
    pub fn read_input_registers(&self, number: u16, count: u16) -> Result<Vec<u16>, AccessError> {
        self.lock().read_input_registers_app(number, count)
    }

    /// Write a single input register
    ///
    /// Input registers are read-only on the wire; this is how the embedding
    /// application feeds them.
    pub fn write_input_register(&self, number: u16, value: u16) -> Result<(), AccessError> {
        self.lock().write_input_register(number, value)
    }

    /// Write consecutive input registers, atomically per call
    pub fn write_input_registers(&self, number: u16, values: &[u16]) -> Result<(), AccessError> {
        self.lock().write_input_registers(number, values)
    }

    /// Read a 32-bit unsigned value held in two consecutive holding registers
    /// using the word order configured for this device
    pub fn read_register_u32(&self, number: u16) -> Result<u32, AccessError> {
        self.lock().read_register_u32(number)
    }

    /// Write a 32-bit unsigned value into two consecutive holding registers
    /// using the word order configured for this device
    pub fn write_register_u32(&self, number: u16, value: u32) -> Result<(), AccessError> {
        self.lock().write_register_u32(number, value)
    }

    /// Read a 32-bit signed value held in two consecutive holding registers
    pub fn read_register_i32(&self, number: u16) -> Result<i32, AccessError> {
        self.lock().read_register_i32(number)
    }

    /// Write a 32-bit signed value into two consecutive holding registers
    pub fn write_register_i32(&self, number: u16, value: i32) -> Result<(), AccessError> {
        self.lock().write_register_i32(number, value)
    }
}
