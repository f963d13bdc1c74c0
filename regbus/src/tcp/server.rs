use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::server::map::DeviceMap;
use crate::server::task::SessionTask;
use crate::shutdown::ShutdownSignal;

struct SessionTracker {
    max: usize,
    id: u64,
    sessions: BTreeMap<u64, tokio::sync::mpsc::Sender<()>>,
}

type SessionTrackerWrapper = Arc<Mutex<SessionTracker>>;

impl SessionTracker {
    fn new(max: usize) -> SessionTracker {
        Self {
            max,
            id: 0,
            sessions: BTreeMap::new(),
        }
    }

    fn get_next_id(&mut self) -> u64 {
        let ret = self.id;
        self.id += 1;
        ret
    }

    fn wrapped(max: usize) -> SessionTrackerWrapper {
        Arc::new(Mutex::new(Self::new(max)))
    }

    fn add(&mut self, sender: tokio::sync::mpsc::Sender<()>) -> u64 {
        if !self.sessions.is_empty() && self.sessions.len() >= self.max {
            let id = *self.sessions.keys().next().unwrap();
            tracing::warn!("exceeded max connections, closing oldest session: {}", id);
            // when the record drops, and there are no more senders,
            // the other end will stop the task
            self.sessions.remove(&id);
        }

        let id = self.get_next_id();
        self.sessions.insert(id, sender);
        id
    }

    fn remove(&mut self, id: u64) {
        self.sessions.remove(&id);
    }
}

pub(crate) struct ServerTask {
    listener: TcpListener,
    devices: DeviceMap,
    tracker: SessionTrackerWrapper,
    decode: DecodeLevel,
    read_timeout: Option<Duration>,
    shutdown_signal: ShutdownSignal,
}

impl ServerTask {
    pub(crate) fn new(
        max_sessions: usize,
        listener: TcpListener,
        devices: DeviceMap,
        decode: DecodeLevel,
        read_timeout: Option<Duration>,
        shutdown_signal: ShutdownSignal,
    ) -> Self {
        Self {
            listener,
            devices,
            tracker: SessionTracker::wrapped(max_sessions),
            decode,
            read_timeout,
            shutdown_signal,
        }
    }

    pub(crate) async fn run(&mut self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("server shutdown");
                    return; // shutdown signal
                }
                result = self.listener.accept() => {
                    match result {
                        Err(err) => {
                            // contained: the listener stays up and other sessions continue
                            tracing::error!("error accepting connection: {}", err);
                        }
                        Ok((socket, addr)) => {
                            self.handle(socket, addr).await
                        }
                    }
                }
            }
        }
    }

    async fn handle(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let mut phys = PhysLayer::new_tcp(socket);
        let devices = self.devices.clone();
        let tracker = self.tracker.clone();
        let decode = self.decode;
        let read_timeout = self.read_timeout;
        let (tx, rx) = tokio::sync::mpsc::channel(1);

        let id = self.tracker.lock().unwrap().add(tx);
        let signal = self.shutdown_signal.clone();

        tracing::info!("accepted connection {} from: {}", id, addr);

        tokio::spawn(async move {
            let mut session = SessionTask::tcp(devices, rx, decode, read_timeout);
            let err = session.run(&mut phys).await;
            // invariant violations must not keep serving corrupted state
            if let RequestError::Internal(internal) = err {
                tracing::error!("internal fault, shutting the server down: {}", internal);
                signal.signal();
            }
            tracing::info!("shutdown session {}: {}", id, err);
            tracker.lock().unwrap().remove(id);
        });
    }
}
