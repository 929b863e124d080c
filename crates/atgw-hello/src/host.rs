//! Session handler for the hello host.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use atgw_core::{CloseReason, Error, ErrorReport, Session, SessionHandler, WriteCompletion};
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Forwards writes to the connection task and turns session events into
/// log lines and an exit decision.
#[derive(Debug)]
pub struct HelloHandler {
    writes: UnboundedSender<Bytes>,
    exit: Arc<AtomicBool>,
}

impl HelloHandler {
    pub fn new(writes: UnboundedSender<Bytes>, exit: Arc<AtomicBool>) -> Self {
        Self { writes, exit }
    }
}

impl SessionHandler for HelloHandler {
    fn on_write_start(
        &mut self,
        _session: &mut Session,
        data: Bytes,
    ) -> Result<WriteCompletion, Error> {
        // The connection task reports completion through notify_write_done
        self.writes.send(data).map_err(|_| Error::Network)?;
        Ok(WriteCompletion::Pending)
    }

    fn on_message(&mut self, _session: &mut Session, data: &[u8]) -> Result<(), Error> {
        info!("recv {}", String::from_utf8_lossy(data));
        Ok(())
    }

    fn on_init_new_session(&mut self, _session: &mut Session) -> Result<u64, Error> {
        Ok(0)
    }

    fn on_init_reconnect(&mut self, _session: &mut Session, session_id: u64) -> Result<(), Error> {
        info!(session_id, "resuming session");
        Ok(())
    }

    fn on_close(&mut self, _session: &mut Session, reason: CloseReason) -> Result<(), Error> {
        let reconnectable = reason.is_reconnectable();
        info!(%reason, reconnectable, "session closed");
        if !reconnectable {
            self.exit.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn on_handshake_done(
        &mut self,
        session: &mut Session,
        status: Result<(), Error>,
    ) -> Result<(), Error> {
        info!(status = Error::status_of(status), "handshake done\n{}", session.information());
        if status.is_err() {
            self.exit.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn on_handshake_update(
        &mut self,
        session: &mut Session,
        status: Result<(), Error>,
    ) -> Result<(), Error> {
        info!(status = Error::status_of(status), "handshake updated\n{}", session.information());
        if status.is_err() {
            self.exit.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn on_error(&mut self, _session: &mut Session, report: &ErrorReport) -> Result<(), Error> {
        if report.error == Error::Network {
            warn!(location = report.location, line = report.line, "{}", report.message);
        } else {
            error!(
                location = report.location,
                line = report.line,
                code = report.error.code(),
                "{}",
                report.message
            );
        }
        Ok(())
    }
}
