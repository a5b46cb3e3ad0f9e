//! Control port: one client at a time, one request per line

use std::{
    net::{Shutdown, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError},
        Arc, Mutex,
    },
    thread::sleep,
    time::{Duration, Instant},
};

use proto::{write_line, ErrorLine, LineReader, ProtoError, Request};
use shared::lock;
use thermo::ZoneEvent;
use tracing::{debug, error, info, warn};

use crate::Registry;

/// Granularity at which blocked socket operations look at the running flag
const POLL_MS: u64 = 50;

/// The connected client's outbound half, shared with the event forwarder
pub(crate) type ClientWriter = Arc<Mutex<Option<TcpStream>>>;

pub(crate) struct Server {
    pub listener: TcpListener,
    pub registry: Arc<Registry>,
    pub running: Arc<AtomicBool>,
    pub client: ClientWriter,
    pub recv_timeout: Duration,
}

impl Server {
    /// Accept and serve clients until the supervisor stops.
    pub fn serve(&self) {
        let poll = Duration::from_millis(POLL_MS);

        while self.running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");

                    match self.session(stream) {
                        Ok(()) => info!(%peer, "client disconnected"),
                        Err(e) => warn!(%peer, error = %e, "client dropped"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => sleep(poll),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "*FAULT* control port failed");
                    break;
                }
            }
        }
    }

    fn session(&self, stream: TcpStream) -> Result<(), ProtoError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(POLL_MS)))?;
        stream.set_write_timeout(Some(self.recv_timeout))?;

        *lock(&self.client) = Some(stream.try_clone()?);

        let mut reader = LineReader::new(stream);
        let mut heard = Instant::now();

        let result = loop {
            if !self.running.load(Ordering::Acquire) {
                break Ok(());
            }

            match reader.read_line() {
                Ok(line) => {
                    heard = Instant::now();

                    if let Err(e) = self.handle(&line) {
                        break Err(e);
                    }
                }
                Err(ProtoError::Timeout) => {
                    if heard.elapsed() >= self.recv_timeout {
                        info!("client silent for {:?}, dropping", self.recv_timeout);
                        break Ok(());
                    }
                }
                Err(ProtoError::Closed) => break Ok(()),
                Err(e @ ProtoError::Malformed(_)) => {
                    if let Err(e) = self.reply(&ErrorLine::new(e.kind(), None, &e).to_string()) {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(stream) = lock(&self.client).take() {
            stream.shutdown(Shutdown::Both).unwrap_or_default();
        }

        result
    }

    /// Parse, dispatch and answer one line. Only a failure to answer ends
    /// the session.
    fn handle(&self, line: &str) -> Result<(), ProtoError> {
        let line = line.trim();

        debug!(line, "request");

        let reply = match line.parse::<Request>() {
            Ok(request) => match self.registry.dispatch(&request) {
                Ok(value) => value,
                Err(e) => {
                    warn!(request = line, error = %e, "request refused");
                    Some(ErrorLine::new(e.kind(), Some(line), &e).to_string())
                }
            },
            Err(e) => {
                warn!(request = line, error = %e, "bad request");
                Some(ErrorLine::new(e.kind(), Some(line), &e).to_string())
            }
        };

        match reply {
            Some(reply) => self.reply(&reply),
            None => Ok(()),
        }
    }

    fn reply(&self, line: &str) -> Result<(), ProtoError> {
        send(&self.client, line)
    }
}

fn send(client: &Mutex<Option<TcpStream>>, line: &str) -> Result<(), ProtoError> {
    match lock(client).as_mut() {
        Some(stream) => write_line(stream, line),
        None => Ok(()),
    }
}

/// Push zone events to whichever client is connected. Events raised while
/// nobody is connected are only logged by the zone.
pub(crate) fn forward_events(
    events: Receiver<ZoneEvent>,
    client: ClientWriter,
    running: Arc<AtomicBool>,
) {
    let poll = Duration::from_millis(POLL_MS);

    while running.load(Ordering::Acquire) {
        match events.recv_timeout(poll) {
            Ok(event) => {
                let line = ErrorLine::new(event.kind(), None, &event).to_string();

                if let Err(e) = send(&client, &line) {
                    debug!(error = %e, "event not delivered");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
