use std::net::SocketAddr;
use std::time::Duration;

use tracing::Instrument;

use crate::decode::DecodeLevel;
use crate::server::map::DeviceMap;
use crate::shutdown::ShutdownSignal;
use crate::tcp::server::ServerTask;

/// Engine-wide settings that are not part of the transport address
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Maximum number of concurrent TCP sessions, the oldest is evicted beyond it
    pub max_sessions: usize,
    /// If set, a TCP session that stays silent for this long is considered
    /// stale and dropped
    pub read_timeout: Option<Duration>,
    /// Protocol decode logging
    pub decode: DecodeLevel,
    /// Trip the engine's shutdown signal on Ctrl-C
    pub bind_ctrl_c: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            read_timeout: None,
            decode: DecodeLevel::nothing(),
            bind_ctrl_c: false,
        }
    }
}

struct Running {
    // dropping the sender stops the accept loop
    _tx: tokio::sync::mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// The server engine: owns the transport resource and a current-thread tokio
/// runtime, and advances all I/O only inside [`poll`](Server::poll).
///
/// The embedding application alternates between its own work (touching the
/// data model through [`SlaveHandle`](crate::server::SlaveHandle)s) and
/// `poll`, which bounds the latency of both sides by the poll budget:
///
/// ```no_run
/// use std::time::Duration;
/// use regbus::server::{DeviceConfig, DeviceMap, Server, Settings};
/// use regbus::types::UnitId;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut devices = DeviceMap::new();
///     let slave = devices.register(UnitId::new(10), DeviceConfig::new(1, 0, 8, 2))?;
///
///     let mut server = Server::open_tcp("0.0.0.0:502".parse()?, devices, Settings::default())?;
///     while server.is_open() {
///         slave.write_input_register(1, 42)?;
///         server.poll(Duration::from_millis(100));
///     }
///     Ok(())
/// }
/// ```
pub struct Server {
    runtime: Option<tokio::runtime::Runtime>,
    running: Option<Running>,
    shutdown: ShutdownSignal,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Bind a TCP listener and start accepting connections on the next poll.
    ///
    /// Fails if the endpoint cannot be bound.
    pub fn open_tcp(
        addr: SocketAddr,
        devices: DeviceMap,
        settings: Settings,
    ) -> Result<Self, std::io::Error> {
        let runtime = Self::build_runtime()?;
        let listener = runtime.block_on(tokio::net::TcpListener::bind(addr))?;
        let local_addr = listener.local_addr().ok();

        let shutdown = Self::make_shutdown(&runtime, &settings);

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut task = ServerTask::new(
            settings.max_sessions,
            listener,
            devices,
            settings.decode,
            settings.read_timeout,
            shutdown.clone(),
        );
        let join = runtime.spawn(
            async move { task.run(rx).await }
                .instrument(tracing::info_span!("Modbus-Server-TCP", "listen" = ?local_addr)),
        );

        Ok(Server {
            runtime: Some(runtime),
            running: Some(Running { _tx: tx, task: join }),
            shutdown,
            local_addr,
        })
    }

    /// Open a serial port and service it as a Modbus RTU server.
    ///
    /// Fails if the port cannot be opened; later port failures are retried
    /// with a fixed delay.
    #[cfg(feature = "serial")]
    pub fn open_rtu(
        path: &str,
        serial_settings: crate::serial::SerialSettings,
        devices: DeviceMap,
        settings: Settings,
    ) -> Result<Self, std::io::Error> {
        use crate::common::phys::PhysLayer;
        use crate::serial::server::RtuServerTask;
        use crate::server::task::SessionTask;

        let runtime = Self::build_runtime()?;
        let serial = runtime
            .block_on(async { crate::serial::open(path, serial_settings) })
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

        let shutdown = Self::make_shutdown(&runtime, &settings);

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let session = SessionTask::rtu(devices, rx, settings.decode);
        let mut task = RtuServerTask {
            port: path.to_string(),
            settings: serial_settings,
            phys: Some(PhysLayer::new_serial(serial)),
            session,
            shutdown_signal: shutdown.clone(),
        };
        let port = path.to_string();
        let join = runtime.spawn(
            async move { task.run().await }
                .instrument(tracing::info_span!("Modbus-Server-RTU", "port" = %port)),
        );

        Ok(Server {
            runtime: Some(runtime),
            running: Some(Running { _tx: tx, task: join }),
            shutdown,
            local_addr: None,
        })
    }

    fn build_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
        tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
    }

    fn make_shutdown(runtime: &tokio::runtime::Runtime, settings: &Settings) -> ShutdownSignal {
        let shutdown = ShutdownSignal::new();
        if settings.bind_ctrl_c {
            let signal = shutdown.clone();
            runtime.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("received Ctrl-C");
                    signal.signal();
                }
            });
        }
        shutdown
    }

    /// Service one iteration of the engine for at most `budget`.
    ///
    /// Accepting connections, reading and decoding frames, dispatching
    /// requests and writing responses all happen only inside this call; the
    /// caller regains control once the budget elapses. The shutdown flag is
    /// checked first, so a signaled engine releases its resources here
    /// instead of doing any I/O.
    pub fn poll(&mut self, budget: Duration) {
        if self.shutdown.is_signaled() {
            self.close();
            return;
        }

        let finished = match (&self.runtime, &self.running) {
            (Some(runtime), Some(running)) => {
                runtime.block_on(async { tokio::time::sleep(budget).await });
                running.task.is_finished()
            }
            _ => return,
        };

        if finished || self.shutdown.is_signaled() {
            self.close();
        }
    }

    /// True while the engine owns its transport resource
    pub fn is_open(&self) -> bool {
        self.running.is_some()
    }

    /// The bound local address (TCP only), useful when binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A cloneable flag that requests shutdown on the next poll
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop the engine and release the listener/port. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.shutdown.signal();
        if let Some(running) = self.running.take() {
            // dropping the sender stops the accept loop, cancelling the
            // runtime below stops everything else
            drop(running);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(100));
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}
