use std::time::Duration;

use crate::common::cursor::ReadCursor;
use crate::common::frame::{Frame, FrameDestination, FramedReader, FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::server::map::DeviceMap;
use crate::server::request::{Request, RequestDisplay};

/// Services a single transport session: reads frames, decodes and dispatches
/// requests, writes replies.
///
/// Responses are sent in the order requests are decoded because the loop is
/// strictly sequential per session.
pub(crate) struct SessionTask {
    devices: DeviceMap,
    shutdown: tokio::sync::mpsc::Receiver<()>,
    reader: FramedReader,
    writer: FrameWriter,
    decode: DecodeLevel,
    read_timeout: Option<Duration>,
    recover_frame_errors: bool,
}

impl SessionTask {
    pub(crate) fn tcp(
        devices: DeviceMap,
        shutdown: tokio::sync::mpsc::Receiver<()>,
        decode: DecodeLevel,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            devices,
            shutdown,
            reader: FramedReader::tcp(),
            writer: FrameWriter::tcp(),
            decode,
            read_timeout,
            recover_frame_errors: false,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn rtu(
        devices: DeviceMap,
        shutdown: tokio::sync::mpsc::Receiver<()>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            devices,
            shutdown,
            reader: FramedReader::rtu_request(),
            writer: FrameWriter::rtu(),
            decode,
            // the single serial session is persistent, it never goes stale
            read_timeout: None,
            recover_frame_errors: true,
        }
    }

    /// Run until an unrecoverable error or shutdown, returning the reason
    pub(crate) async fn run(&mut self, io: &mut PhysLayer) -> RequestError {
        loop {
            if let Err(err) = self.run_one(io).await {
                if self.recover_frame_errors {
                    // a corrupt serial frame is discarded in silence, the
                    // inter-frame gap delimits the next one
                    if let RequestError::BadFrame(frame_err) = err {
                        tracing::warn!("discarding corrupt frame: {}", frame_err);
                        self.reader.reset();
                        continue;
                    }
                }
                return err;
            }
        }
    }

    /// Wait while remaining responsive to shutdown
    #[cfg(feature = "serial")]
    pub(crate) async fn sleep_for(&mut self, duration: Duration) -> Result<(), RequestError> {
        tokio::select! {
            _ = self.shutdown.recv() => Err(RequestError::Shutdown),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn reset_framing(&mut self) {
        self.reader.reset();
    }

    async fn run_one(&mut self, io: &mut PhysLayer) -> Result<(), RequestError> {
        let frame = {
            let reader = &mut self.reader;
            let decode = self.decode;
            let read_timeout = self.read_timeout;
            // reborrow so the select arm does not consume the outer reference
            let io = &mut *io;

            tokio::select! {
                _ = self.shutdown.recv() => {
                    return Err(RequestError::Shutdown);
                }
                result = async {
                    match read_timeout {
                        Some(duration) => {
                            match tokio::time::timeout(duration, reader.next_frame(io, decode)).await {
                                Ok(result) => result,
                                Err(_) => {
                                    tracing::warn!("no request within {:?}, closing stale connection", duration);
                                    Err(RequestError::Io(std::io::ErrorKind::TimedOut))
                                }
                            }
                        }
                        None => reader.next_frame(io, decode).await,
                    }
                } => result?,
            }
        };

        self.handle_frame(frame, io).await
    }

    async fn handle_frame(&mut self, frame: Frame, io: &mut PhysLayer) -> Result<(), RequestError> {
        let mut cursor = ReadCursor::new(frame.payload());

        let raw_function = match cursor.read_u8() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("received request without a function code");
                return Ok(());
            }
        };

        let function = match FunctionCode::get(raw_function) {
            Some(x) => x,
            None => {
                tracing::warn!("received unknown function code: {:#04X}", raw_function);
                if frame.header.destination.is_broadcast() {
                    return Ok(());
                }
                let reply = self.writer.format_exception(
                    frame.header,
                    FunctionField::UnknownFunction(raw_function),
                    ExceptionCode::IllegalFunction,
                    self.decode,
                )?;
                return Ok(io.write(reply, self.decode.physical).await?);
            }
        };

        let request = match Request::parse(function, &mut cursor) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("error parsing {}: {}", function, err);
                if frame.header.destination.is_broadcast() {
                    return Ok(());
                }
                let reply = self.writer.format_exception(
                    frame.header,
                    FunctionField::Exception(function),
                    err.into_exception(),
                    self.decode,
                )?;
                return Ok(io.write(reply, self.decode.physical).await?);
            }
        };

        if self.decode.app.enabled() {
            tracing::info!("PDU RX - {}", RequestDisplay::new(self.decode.app, &request));
        }

        match frame.header.destination {
            FrameDestination::Broadcast => {
                match request.into_broadcast_request() {
                    Some(broadcast) => {
                        for device in self.devices.devices() {
                            broadcast.execute(&mut device.lock().unwrap());
                        }
                    }
                    None => {
                        tracing::warn!("ignoring broadcast of a read request: {}", function);
                    }
                }
                // broadcasts are never answered
                Ok(())
            }
            FrameDestination::UnitId(unit_id) => {
                let device = match self.devices.get(unit_id) {
                    Some(device) => device.clone(),
                    None => {
                        tracing::warn!("received frame for unmapped unit id: {}", unit_id);
                        return Ok(());
                    }
                };

                // only lock the device while formatting, never while writing to the socket
                let reply = {
                    let mut database = device.lock().unwrap();
                    request.get_reply(frame.header, &mut database, &mut self.writer, self.decode)?
                };
                Ok(io.write(reply, self.decode.physical).await?)
            }
        }
    }
}
