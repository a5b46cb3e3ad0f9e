#![doc = include_str!("../README.md")]

pub mod config;
pub mod plant;

mod registry;
mod server;
mod ticker;

pub use config::{Config, PlantConfig, SensorConfig, SupplyConfig, ZoneConfig};
pub use registry::{Registry, SharedZone};

use std::{
    error::Error as ErrorT,
    fmt::Display,
    net::{SocketAddr, TcpListener},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use proto::ProtoError;
use shared::{lock, DEFAULT_BIND, DEFAULT_PORT, RECV_TIMEOUT_MS};
use thermo::{Zone, ZoneError};
use tracing::{error, info};

#[derive(Debug)]
pub enum Error {
    Zone(ZoneError),
    Proto(ProtoError),
    /// No zone is registered under the key
    BadKey(String),
    BadConfig(String),
    /// The supervisor is shutting down
    Closed,
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Error {
    /// Name of the error kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Zone(e) => e.kind(),
            Self::Proto(e) => e.kind(),
            Self::Closed => "ProtocolError",
            Self::BadKey(_) => "BadKey",
            Self::BadConfig(_) | Self::Json(_) => "BadConfig",
            Self::Io(_) => "IOError",
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zone(e) => e.fmt(f),
            Self::Proto(e) => e.fmt(f),
            Self::BadKey(key) => write!(f, "no zone {:?}", key),
            Self::BadConfig(why) => write!(f, "bad configuration: {}", why),
            Self::Closed => write!(f, "supervisor is shutting down"),
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => write!(f, "bad configuration file: {}", e),
        }
    }
}

impl ErrorT for Error {}

impl From<ZoneError> for Error {
    fn from(value: ZoneError) -> Self {
        Self::Zone(value)
    }
}

impl From<supply::SupplyError> for Error {
    fn from(value: supply::SupplyError) -> Self {
        Self::Zone(value.into())
    }
}

impl From<daq::DaqError> for Error {
    fn from(value: daq::DaqError) -> Self {
        Self::Zone(value.into())
    }
}

impl From<ProtoError> for Error {
    fn from(value: ProtoError) -> Self {
        Self::Proto(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Where and how the control port is served
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    /// `0` picks any free port
    pub port: u16,
    /// A client silent for this long is dropped
    pub recv_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            port: DEFAULT_PORT,
            recv_timeout: Duration::from_millis(RECV_TIMEOUT_MS),
        }
    }
}

/// Owns the zones, their tick threads and the control port.
///
/// Dropping the supervisor shuts it down: ticking stops, every zone is
/// stopped and only then is the control port closed.
pub struct Supervisor {
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    tickers: Vec<JoinHandle<()>>,
    server: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn spawn(mut zones: Vec<Zone>, settings: &Settings) -> Result<Self, Error> {
        // Sockets refuse a zero timeout
        if settings.recv_timeout.is_zero() {
            return Err(Error::BadConfig("receive timeout must be positive".to_owned()));
        }

        // # 1: Registry, with every zone reporting to one event queue
        let (events_tx, events_rx) = mpsc::channel();

        for zone in zones.iter_mut() {
            zone.set_events(events_tx.clone());
        }

        drop(events_tx);

        let registry = Arc::new(Registry::new(zones)?);

        // # 2: Control port
        let listener = TcpListener::bind((settings.bind.as_str(), settings.port))?;
        listener.set_nonblocking(true)?;

        let local_addr = listener.local_addr()?;

        info!(%local_addr, zones = ?registry.keys(), "supervisor listening");

        let running = Arc::new(AtomicBool::new(true));

        // # 3: One tick thread per zone
        let mut tickers = Vec::with_capacity(registry.len());

        for slot in registry.slots() {
            tickers.push(ticker::spawn(&slot.key, slot.zone.clone(), running.clone())?);
        }

        // # 4: Protocol and event threads
        let client = Arc::new(Mutex::new(None));

        let server = server::Server {
            listener,
            registry: registry.clone(),
            running: running.clone(),
            client: client.clone(),
            recv_timeout: settings.recv_timeout,
        };

        let server_running = running.clone();
        let forward_running = running.clone();

        let server = vec![
            thread::Builder::new()
                .name("control".to_owned())
                .spawn(move || {
                    server.serve();
                    server_running.store(false, Ordering::Release);
                })?,
            thread::Builder::new()
                .name("events".to_owned())
                .spawn(move || server::forward_events(events_rx, client, forward_running))?,
        ];

        Ok(Self {
            registry,
            running,
            local_addr,
            tickers,
            server,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle on one zone, for in-process inspection
    pub fn zone(&self, key: &str) -> Option<SharedZone> {
        self.registry.get(key).ok().map(|slot| slot.zone.clone())
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Block until the control port gives up, then shut down.
    pub fn wait(&mut self) {
        while self.is_running() {
            thread::sleep(Duration::from_millis(100));
        }

        self.shutdown();
    }

    /// Stop ticking, stop taking requests, drive every zone through stop,
    /// then close the port.
    pub fn shutdown(&mut self) {
        if self.tickers.is_empty() && self.server.is_empty() {
            return;
        }

        info!("supervisor shutting down");

        self.running.store(false, Ordering::Release);

        for ticker in self.tickers.drain(..) {
            ticker.join().unwrap_or_default();
        }

        // Nothing the control port has already read may switch an output
        // back on after the zones are stopped
        self.registry.close();

        for slot in self.registry.slots() {
            if let Err(e) = lock(&slot.zone).stop() {
                error!(zone = %slot.key, error = %e, "*ERR* unable to stop zone");
            }
        }

        for thread in self.server.drain(..) {
            thread.join().unwrap_or_default();
        }

        info!("supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
