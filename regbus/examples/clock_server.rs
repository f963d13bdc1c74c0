//! A Modbus time server configured from a JSON file.
//!
//! ```text
//! clock_server examples/clock-server-tcp.json
//! ```
//!
//! Once the server has started you can test it with mbpoll:
//!
//! ```text
//! $ mbpoll -m tcp -p 1502 -a 10 -t 3 -c 8 localhost
//! ```
//!
//! Input registers 1-8 hold {sec, min, hour, mday, mon, year, wday, yday} of
//! the local time. Holding registers 1-2 hold the signed 32-bit number of
//! seconds to add to UTC (big-endian word order "abcd"), and coil 1 holds the
//! daylight-saving flag; both are writable by clients and picked up on the
//! next refresh.

use chrono::{DateTime, Datelike, Local, Timelike, Utc};

use regbus::config::{ServerConfig, TransportConfig};
use regbus::server::{Server, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or("the JSON config must be provided as a parameter, e.g.: clock_server clock-server-tcp.json")?;

    println!("Modbus time server");
    println!("opening {path}...");
    let config = ServerConfig::from_file(&path)?;

    let (devices, handles) = config.build_device_map()?;
    let clock = handles
        .into_iter()
        .next()
        .expect("a validated config defines at least one slave");

    // seed the daylight flag and the GMT offset from the local timezone
    let local_offset = Local::now().offset().local_minus_utc();
    clock.write_coil(1, false)?;
    clock.write_register_i32(1, local_offset)?;

    let settings = Settings {
        decode: config.decode_level(),
        bind_ctrl_c: true,
        ..Settings::default()
    };

    let mut server = match &config.transport {
        TransportConfig::Tcp { address, port } => {
            let addr = format!("{address}:{port}").parse()?;
            let server = Server::open_tcp(addr, devices, settings)?;
            if let Some(addr) = server.local_addr() {
                println!("listening on {addr}...");
            }
            server
        }
        TransportConfig::Rtu { device, .. } => {
            let serial = config
                .serial_settings()
                .expect("an rtu transport has serial settings");
            println!("serving on {device}...");
            Server::open_rtu(device, serial, devices, settings)?
        }
    };

    println!("Press Ctrl+C to stop...");

    let mut before = Utc::now().timestamp();
    while server.is_open() {
        let now = Utc::now().timestamp();

        if now > before {
            before = now;

            // clients may have changed the daylight flag or the offset
            let daylight = clock.read_coil(1)?;
            let gmt_offset = clock.read_register_i32(1)?;

            let shifted = now + gmt_offset as i64 + if daylight { 3600 } else { 0 };
            if let Some(t) = DateTime::from_timestamp(shifted, 0) {
                let registers = [
                    t.second() as u16,
                    t.minute() as u16,
                    t.hour() as u16,
                    t.day() as u16,
                    t.month() as u16,
                    t.year() as u16,
                    t.weekday().num_days_from_sunday() as u16,
                    t.ordinal() as u16,
                ];
                clock.write_input_registers(1, &registers)?;
            }
        }

        server.poll(config.poll_timeout());
    }

    println!("everything was closed, have a nice day!");
    Ok(())
}
