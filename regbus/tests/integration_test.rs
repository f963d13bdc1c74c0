use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use regbus::server::{DeviceConfig, DeviceMap, Server, Settings};
use regbus::types::UnitId;
use regbus::ShutdownSignal;

fn start_server(devices: DeviceMap) -> (SocketAddr, ShutdownSignal, thread::JoinHandle<()>) {
    let mut server = Server::open_tcp(
        "127.0.0.1:0".parse().unwrap(),
        devices,
        Settings::default(),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();
    let signal = server.shutdown_signal();

    let handle = thread::spawn(move || {
        while server.is_open() {
            server.poll(Duration::from_millis(10));
        }
    });

    (addr, signal, handle)
}

#[test]
fn serves_the_clock_register_map_over_tcp() {
    let mut devices = DeviceMap::new();
    let slave = devices
        .register(UnitId::new(10), DeviceConfig::new(1, 0, 8, 2))
        .unwrap();

    // what the clock application does between polls
    slave.write_register_i32(1, 3600).unwrap();
    slave.write_coil(1, false).unwrap();
    slave
        .write_input_registers(1, &[37, 40, 15, 28, 11, 2019, 4, 332])
        .unwrap();

    let (addr, signal, handle) = start_server(devices);
    let mut stream = TcpStream::connect(addr).unwrap();

    // read 8 input registers starting at address 0
    stream
        .write_all(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x04, 0x00, 0x00, 0x00, 0x08,
        ])
        .unwrap();
    let mut response = [0u8; 9 + 16];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        &response[..9],
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x13, 0x0A, 0x04, 0x10]
    );
    let values: Vec<u16> = response[9..]
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(values, vec![37, 40, 15, 28, 11, 2019, 4, 332]);

    // the 32-bit GMT offset occupies two holding registers, high word first
    stream
        .write_all(&[
            0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x03, 0x00, 0x00, 0x00, 0x02,
        ])
        .unwrap();
    let mut response = [0u8; 9 + 4];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        &response[..9],
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x07, 0x0A, 0x03, 0x04]
    );
    assert_eq!(&response[9..], &[0x00, 0x00, 0x0E, 0x10]);

    // the daylight coil reads back as off
    stream
        .write_all(&[
            0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x01, 0x00, 0x00, 0x00, 0x01,
        ])
        .unwrap();
    let mut response = [0u8; 10];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        response,
        [0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x0A, 0x01, 0x01, 0x00]
    );

    signal.signal();
    handle.join().unwrap();
}

#[test]
fn wire_writes_update_the_data_model_and_bad_requests_get_exceptions() {
    let mut devices = DeviceMap::new();
    let slave = devices
        .register(UnitId::new(1), DeviceConfig::new(4, 0, 0, 4))
        .unwrap();

    let (addr, signal, handle) = start_server(devices);
    let mut stream = TcpStream::connect(addr).unwrap();

    // write multiple registers [0xCAFE, 0x0001] at address 0
    stream
        .write_all(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0xCA,
            0xFE, 0x00, 0x01,
        ])
        .unwrap();
    let mut response = [0u8; 12];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        response,
        [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x10, 0x00, 0x00, 0x00, 0x02]
    );
    assert_eq!(slave.read_registers(1, 2).unwrap(), vec![0xCAFE, 0x0001]);

    // write single coil at address 3, echoed back, visible as number 4
    stream
        .write_all(&[
            0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x03, 0xFF, 0x00,
        ])
        .unwrap();
    let mut response = [0u8; 12];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        response,
        [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x03, 0xFF, 0x00]
    );
    assert!(slave.read_coil(4).unwrap());

    // reading 5 registers from a table of 4 is an illegal data address
    stream
        .write_all(&[
            0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x05,
        ])
        .unwrap();
    let mut response = [0u8; 9];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        response,
        [0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]
    );

    // a coil state other than FF00/0000 is an illegal data value
    stream
        .write_all(&[
            0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x00, 0xAB, 0xCD,
        ])
        .unwrap();
    let mut response = [0u8; 9];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        response,
        [0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0x85, 0x03]
    );

    // an unsupported function code is an illegal function
    stream
        .write_all(&[0x00, 0x05, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2B])
        .unwrap();
    let mut response = [0u8; 9];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        response,
        [0x00, 0x05, 0x00, 0x00, 0x00, 0x03, 0x01, 0xAB, 0x01]
    );

    signal.signal();
    handle.join().unwrap();
}

#[test]
fn unknown_unit_id_gets_no_response_and_does_not_hang_the_engine() {
    let mut devices = DeviceMap::new();
    devices
        .register(UnitId::new(10), DeviceConfig::new(0, 0, 8, 0))
        .unwrap();

    let (addr, signal, handle) = start_server(devices);
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(250)))
        .unwrap();

    // request addressed to the unregistered slave 99: silence
    stream
        .write_all(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x63, 0x04, 0x00, 0x00, 0x00, 0x01,
        ])
        .unwrap();
    let mut buffer = [0u8; 16];
    let err = stream.read(&mut buffer).unwrap_err();
    assert!(matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    ));

    // the same connection still gets answers for a mapped unit
    stream
        .write_all(&[
            0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x04, 0x00, 0x00, 0x00, 0x01,
        ])
        .unwrap();
    let mut response = [0u8; 11];
    stream.read_exact(&mut response).unwrap();
    assert_eq!(
        &response[..9],
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x0A, 0x04, 0x02]
    );

    signal.signal();
    handle.join().unwrap();
}

#[test]
fn broadcast_writes_are_applied_to_every_slave_and_never_answered() {
    let mut devices = DeviceMap::new();
    let first = devices
        .register(UnitId::new(1), DeviceConfig::new(0, 0, 0, 2))
        .unwrap();
    let second = devices
        .register(UnitId::new(2), DeviceConfig::new(0, 0, 0, 2))
        .unwrap();

    let (addr, signal, handle) = start_server(devices);
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(250)))
        .unwrap();

    // write single register via unit id 0 (broadcast)
    stream
        .write_all(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x06, 0x00, 0x00, 0x12, 0x34,
        ])
        .unwrap();

    let mut buffer = [0u8; 16];
    let err = stream.read(&mut buffer).unwrap_err();
    assert!(matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    ));

    assert_eq!(first.read_register(1).unwrap(), 0x1234);
    assert_eq!(second.read_register(1).unwrap(), 0x1234);

    signal.signal();
    handle.join().unwrap();
}

#[test]
fn close_is_idempotent_and_leaves_the_engine_closed() {
    let mut devices = DeviceMap::new();
    devices
        .register(UnitId::new(1), DeviceConfig::new(1, 0, 0, 0))
        .unwrap();

    let mut server = Server::open_tcp(
        "127.0.0.1:0".parse().unwrap(),
        devices,
        Settings::default(),
    )
    .unwrap();

    assert!(server.is_open());
    server.poll(Duration::from_millis(10));

    server.close();
    assert!(!server.is_open());
    server.close();
    assert!(!server.is_open());

    // polling a closed engine is a no-op
    server.poll(Duration::from_millis(10));
    assert!(!server.is_open());
}

#[test]
fn shutdown_signal_closes_the_engine_on_the_next_poll() {
    let mut devices = DeviceMap::new();
    devices
        .register(UnitId::new(1), DeviceConfig::new(1, 0, 0, 0))
        .unwrap();

    let (_addr, signal, handle) = start_server(devices);
    signal.signal();
    // the polling thread observes the flag, closes the engine and exits
    handle.join().unwrap();
}
