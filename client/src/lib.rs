//! Operator side of the control port: every zone operation as a local call
//! that marshals to one protocol line.

use std::{
    collections::VecDeque,
    error::Error as ErrorT,
    fmt::Display,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use proto::{write_line, ErrorLine, LineReader, ProtoError, Request, Subject, Verb};
use shared::RECV_TIMEOUT_MS;
use tracing::{debug, trace};

/// Key used for requests that address the registry, not a zone
pub static ANY_KEY: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    Proto(ProtoError),
    /// No zone at this position of the registry
    BadIndex(usize),
    /// No zone under this key
    BadKey(String),
    /// The supervisor refused a request
    Remote(ErrorLine),
    /// A reply could not be read as the expected type
    Parse(String),
}

impl ClientError {
    /// Name of the error kind, as the supervisor would put it on the wire
    pub fn kind(&self) -> &str {
        match self {
            Self::Proto(e) => e.kind(),
            Self::BadIndex(_) => "BadIndex",
            Self::BadKey(_) => "BadKey",
            Self::Remote(line) => &line.kind,
            Self::Parse(_) => "ProtocolError",
        }
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proto(e) => e.fmt(f),
            Self::BadIndex(index) => write!(f, "no zone at index {}", index),
            Self::BadKey(key) => write!(f, "no zone {:?}", key),
            Self::Remote(line) => line.fmt(f),
            Self::Parse(reply) => write!(f, "unexpected reply {:?}", reply),
        }
    }
}

impl ErrorT for ClientError {}

impl From<ProtoError> for ClientError {
    fn from(value: ProtoError) -> Self {
        Self::Proto(value)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        Self::Proto(value.into())
    }
}

/// Connection to a supervisor.
///
/// Commands are fire and forget; their errors come back later as error
/// lines echoing the command and are kept until [`ZoneRemote::sync`] or
/// [`PidHeaterClient::take_errors`]. Asynchronous zone events are kept
/// apart and drained with [`PidHeaterClient::take_events`].
pub struct PidHeaterClient {
    reader: LineReader<TcpStream>,
    writer: TcpStream,
    timeout: Duration,
    errors: VecDeque<ErrorLine>,
    events: VecDeque<ErrorLine>,
}

impl PidHeaterClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Self::connect_timeout(addr, Duration::from_millis(RECV_TIMEOUT_MS))
    }

    /// Connect, giving up on any reply after `timeout`
    pub fn connect_timeout(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;

        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let writer = stream.try_clone()?;

        debug!(peer = ?stream.peer_addr().ok(), "connected");

        Ok(Self {
            reader: LineReader::new(stream),
            writer,
            timeout,
            errors: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    /// Send a request and, for a query, wait for its reply.
    ///
    /// Error lines that arrive first are filed away; an error line echoing
    /// this very request is its answer.
    pub fn request(&mut self, request: &Request) -> Result<Option<String>, ClientError> {
        let line = request.to_string();

        trace!(%line, "send");
        write_line(&mut self.writer, &line)?;

        if !request.expects_reply() {
            return Ok(None);
        }

        loop {
            let reply = self.reader.read_line()?;

            if !ErrorLine::is_error(&reply) {
                return Ok(Some(reply));
            }

            let error: ErrorLine = reply.parse()?;

            if error.request.as_deref() == Some(line.as_str()) {
                return Err(ClientError::Remote(error));
            }

            self.file(error);
        }
    }

    /// Send a raw line and, for a query, return its reply.
    pub fn send_line(&mut self, line: &str) -> Result<Option<String>, ClientError> {
        let request: Request = line.parse()?;
        self.request(&request)
    }

    fn query(&mut self, key: &str, subject: Subject, verb: Verb) -> Result<String, ClientError> {
        self.request(&Request::query(key, subject, verb))?
            .ok_or_else(|| ClientError::Parse(String::new()))
    }

    fn file(&mut self, error: ErrorLine) {
        match error.request {
            Some(_) => self.errors.push_back(error),
            None => self.events.push_back(error),
        }
    }

    /// Keys of all zones, in registry order
    pub fn keys(&mut self) -> Result<Vec<String>, ClientError> {
        let list = self.query(ANY_KEY, Subject::AM, Verb::LIST)?;

        Ok(list
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub fn zone(&mut self, key: &str) -> Result<ZoneRemote<'_>, ClientError> {
        if !self.keys()?.iter().any(|k| k == key) {
            return Err(ClientError::BadKey(key.to_owned()));
        }

        Ok(ZoneRemote {
            key: key.to_owned(),
            client: self,
        })
    }

    /// Zone by its position in the registry
    pub fn zone_at(&mut self, index: usize) -> Result<ZoneRemote<'_>, ClientError> {
        let key = self
            .keys()?
            .into_iter()
            .nth(index)
            .ok_or(ClientError::BadIndex(index))?;

        Ok(ZoneRemote { key, client: self })
    }

    /// Command errors received so far
    pub fn take_errors(&mut self) -> Vec<ErrorLine> {
        self.errors.drain(..).collect()
    }

    /// Asynchronous zone events received so far
    pub fn take_events(&mut self) -> Vec<ErrorLine> {
        self.events.drain(..).collect()
    }

    /// Wait up to `timeout` for the next asynchronous event.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<ErrorLine>, ClientError> {
        let deadline = Instant::now() + timeout;

        let result = loop {
            if let Some(event) = self.events.pop_front() {
                break Ok(Some(event));
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break Ok(None);
            }

            self.reader.get_ref().set_read_timeout(Some(left))?;

            match self.reader.read_line() {
                Ok(line) if ErrorLine::is_error(&line) => match line.parse() {
                    Ok(error) => self.file(error),
                    Err(e) => break Err(e.into()),
                },
                Ok(line) => debug!(%line, "stray reply dropped"),
                Err(ProtoError::Timeout) => {}
                Err(e) => break Err(e.into()),
            }
        };

        self.reader.get_ref().set_read_timeout(Some(self.timeout))?;

        result
    }
}

impl Drop for PidHeaterClient {
    fn drop(&mut self) {
        self.writer.shutdown(Shutdown::Both).unwrap_or_default();
    }
}

/// One zone of the supervisor. Getters return the raw reply.
pub struct ZoneRemote<'a> {
    client: &'a mut PidHeaterClient,
    key: String,
}

impl<'a> ZoneRemote<'a> {
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn get(&mut self, subject: Subject, verb: Verb) -> Result<String, ClientError> {
        self.client.query(&self.key, subject, verb)
    }

    fn put(&mut self, subject: Subject, verb: Verb, value: impl Display) -> Result<(), ClientError> {
        self.client
            .request(&Request::set(&self.key, subject, verb, value))
            .map(|_| ())
    }

    fn cmd(&mut self, subject: Subject, verb: Verb) -> Result<(), ClientError> {
        self.client
            .request(&Request::command(&self.key, subject, verb))
            .map(|_| ())
    }

    /// Barrier: wait until the supervisor has handled everything sent so
    /// far, then return the first command error among it.
    pub fn sync(&mut self) -> Result<(), ClientError> {
        self.get(Subject::PD, Verb::REGT)?;

        let mut errors = self.client.errors.drain(..);

        match errors.next() {
            Some(error) => Err(ClientError::Remote(error)),
            None => Ok(()),
        }
    }

    // # 1: Power supply

    pub fn supply_idn(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::IDN)
    }

    pub fn reset_supply(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::PS, Verb::RSET)
    }

    pub fn stop_supply(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::PS, Verb::STOP)
    }

    pub fn ready_supply(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::PS, Verb::REDY)
    }

    pub fn actual_voltage(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::VOLT)
    }

    pub fn actual_current(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::AMPS)
    }

    pub fn setpoint_voltage(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::VSET)
    }

    pub fn set_voltage(&mut self, volts: f32) -> Result<(), ClientError> {
        self.put(Subject::PS, Verb::VSET, volts)
    }

    pub fn setpoint_current(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::ASET)
    }

    pub fn set_current(&mut self, amps: f32) -> Result<(), ClientError> {
        self.put(Subject::PS, Verb::ASET, amps)
    }

    pub fn voltage_limit(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::VLIM)
    }

    pub fn set_voltage_limit(&mut self, volts: f32) -> Result<(), ClientError> {
        self.put(Subject::PS, Verb::VLIM, volts)
    }

    pub fn current_limit(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::ALIM)
    }

    pub fn set_current_limit(&mut self, amps: f32) -> Result<(), ClientError> {
        self.put(Subject::PS, Verb::ALIM, amps)
    }

    pub fn output_enabled(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::CHIO)
    }

    pub fn set_output_enabled(&mut self, on: bool) -> Result<(), ClientError> {
        self.put(Subject::PS, Verb::CHIO, on as u8)
    }

    pub fn supply_channel(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PS, Verb::CHAN)
    }

    pub fn set_supply_channel(&mut self, channel: usize) -> Result<(), ClientError> {
        self.put(Subject::PS, Verb::CHAN, channel)
    }

    // # 2: Thermocouple input

    pub fn sensor_idn(&mut self) -> Result<String, ClientError> {
        self.get(Subject::DQ, Verb::IDN)
    }

    /// Temperature in the sensor's current unit
    pub fn temperature(&mut self) -> Result<String, ClientError> {
        self.get(Subject::DQ, Verb::TEMP)
    }

    pub fn sensor_channel(&mut self) -> Result<String, ClientError> {
        self.get(Subject::DQ, Verb::CHAN)
    }

    pub fn set_sensor_channel(&mut self, channel: usize) -> Result<(), ClientError> {
        self.put(Subject::DQ, Verb::CHAN, channel)
    }

    pub fn tc_type(&mut self) -> Result<String, ClientError> {
        self.get(Subject::DQ, Verb::TCTY)
    }

    pub fn set_tc_type(&mut self, tc: &str) -> Result<(), ClientError> {
        self.put(Subject::DQ, Verb::TCTY, tc)
    }

    pub fn unit(&mut self) -> Result<String, ClientError> {
        self.get(Subject::DQ, Verb::UNIT)
    }

    pub fn set_unit(&mut self, unit: &str) -> Result<(), ClientError> {
        self.put(Subject::DQ, Verb::UNIT, unit)
    }

    // # 3: Control law

    pub fn pid_idn(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::IDN)
    }

    pub fn reset_pid(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::PD, Verb::RSET)
    }

    pub fn reset_pid_limits(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::PD, Verb::RLIM)
    }

    pub fn kp(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::KPRO)
    }

    pub fn set_kp(&mut self, kp: f32) -> Result<(), ClientError> {
        self.put(Subject::PD, Verb::KPRO, kp)
    }

    pub fn ki(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::KINT)
    }

    pub fn set_ki(&mut self, ki: f32) -> Result<(), ClientError> {
        self.put(Subject::PD, Verb::KINT, ki)
    }

    pub fn kd(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::KDER)
    }

    pub fn set_kd(&mut self, kd: f32) -> Result<(), ClientError> {
        self.put(Subject::PD, Verb::KDER, kd)
    }

    pub fn setpoint(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::SETP)
    }

    pub fn set_setpoint(&mut self, temp_c: f32) -> Result<(), ClientError> {
        self.put(Subject::PD, Verb::SETP, temp_c)
    }

    pub fn sample_time(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::SAMP)
    }

    pub fn set_sample_time(&mut self, sample_time_s: f32) -> Result<(), ClientError> {
        self.put(Subject::PD, Verb::SAMP, sample_time_s)
    }

    pub fn regulating(&mut self) -> Result<String, ClientError> {
        self.get(Subject::PD, Verb::REGT)
    }

    pub fn set_regulating(&mut self, regulating: bool) -> Result<(), ClientError> {
        self.put(Subject::PD, Verb::REGT, regulating as u8)
    }

    // # 4: Assembly

    pub fn ready(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::AM, Verb::REDY)
    }

    pub fn stop(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::AM, Verb::STOP)
    }

    pub fn reset(&mut self) -> Result<(), ClientError> {
        self.cmd(Subject::AM, Verb::RSET)
    }

    /// `created`, `armed`, `regulating` or `tripped`
    pub fn status(&mut self) -> Result<String, ClientError> {
        self.get(Subject::AM, Verb::STAT)
    }

    pub fn ticks(&mut self) -> Result<u64, ClientError> {
        let reply = self.get(Subject::AM, Verb::TICK)?;
        reply.parse().map_err(|_| ClientError::Parse(reply))
    }

    pub fn read_errors(&mut self) -> Result<u64, ClientError> {
        let reply = self.get(Subject::AM, Verb::RERR)?;
        reply.parse().map_err(|_| ClientError::Parse(reply))
    }
}
