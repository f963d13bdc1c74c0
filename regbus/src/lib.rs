//! A Modbus TCP/RTU server engine with a typed register map and a bounded,
//! cooperatively-scheduled poll loop, built on [Tokio](https://docs.rs/tokio).
//!
//! # Features
//!
//! * Panic-free parsing of MBAP (TCP) and CRC-framed RTU requests
//! * Built-in per-slave storage for coils, discrete inputs, input registers
//!   and holding registers with atomic range writes
//! * Malformed requests become Modbus exception responses, never crashes
//! * A synchronous `open`/`poll`/`close` lifecycle: all I/O advances only
//!   inside [`poll`](server::Server::poll), so the embedding application can
//!   touch the data model between polls without any locking discipline
//! * 32-bit composite register access with a configurable word order
//!
//! # Supported functions
//!
//! * Read Coils (0x01)
//! * Read Discrete Inputs (0x02)
//! * Read Holding Registers (0x03)
//! * Read Input Registers (0x04)
//! * Write Single Coil (0x05)
//! * Write Single Register (0x06)
//! * Write Multiple Coils (0x0F)
//! * Write Multiple Registers (0x10)
//!
//! # Example
//!
//! A server that exposes one slave and refreshes an input register between
//! polls:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use regbus::server::{DeviceConfig, DeviceMap, Server, Settings};
//! use regbus::types::UnitId;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut devices = DeviceMap::new();
//!     let slave = devices.register(UnitId::new(10), DeviceConfig::new(1, 0, 8, 2))?;
//!
//!     let mut server = Server::open_tcp("0.0.0.0:1502".parse()?, devices, Settings::default())?;
//!
//!     let mut counter: u16 = 0;
//!     while server.is_open() {
//!         counter = counter.wrapping_add(1);
//!         slave.write_input_register(1, counter)?;
//!         server.poll(Duration::from_millis(100));
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Loading and validation of the JSON server configuration
pub mod config;
/// Protocol constants: coil encodings, quantity limits, exception code values
pub mod constants;
/// Protocol decode logging levels
pub mod decode;
/// Error types
pub mod error;
/// Serial transport settings (RTU)
pub mod serial;
/// The server engine, data model and application-facing handles
pub mod server;
/// Shared types: unit ids, address ranges, word order
pub mod types;

mod common;
mod exception;
mod shutdown;
mod tcp;

pub use exception::ExceptionCode;
pub use shutdown::ShutdownSignal;
