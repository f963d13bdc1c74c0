use std::time::Duration;

use crate::common::phys::PhysLayer;
use crate::error::RequestError;
use crate::serial::SerialSettings;
use crate::server::task::SessionTask;
use crate::shutdown::ShutdownSignal;

const RETRY_DELAY: Duration = Duration::from_secs(1);

pub(crate) struct RtuServerTask {
    pub(crate) port: String,
    pub(crate) settings: SerialSettings,
    pub(crate) phys: Option<PhysLayer>,
    pub(crate) session: SessionTask,
    pub(crate) shutdown_signal: ShutdownSignal,
}

impl RtuServerTask {
    /// Service the port until shutdown, reopening it with a fixed delay on failure
    pub(crate) async fn run(&mut self) {
        loop {
            match self.phys.take() {
                Some(mut phys) => {
                    match self.session.run(&mut phys).await {
                        RequestError::Shutdown => return,
                        RequestError::Internal(internal) => {
                            // invariant violations must not keep serving corrupted state
                            tracing::error!(
                                "internal fault, shutting the server down: {}",
                                internal
                            );
                            self.shutdown_signal.signal();
                            return;
                        }
                        err => tracing::warn!("serial port error: {}", err),
                    }
                    self.session.reset_framing();
                    if self.session.sleep_for(RETRY_DELAY).await.is_err() {
                        return;
                    }
                }
                None => match crate::serial::open(&self.port, self.settings) {
                    Ok(serial) => {
                        tracing::info!("opened port {}", self.port);
                        self.phys = Some(PhysLayer::new_serial(serial));
                    }
                    Err(err) => {
                        tracing::warn!(
                            "unable to open serial port, retrying in {:?} - error: {}",
                            RETRY_DELAY,
                            err
                        );
                        if self.session.sleep_for(RETRY_DELAY).await.is_err() {
                            return;
                        }
                    }
                },
            }
        }
    }
}
