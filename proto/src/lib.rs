//! Line protocol spoken on the supervisor's control port.
//!
//! ```text
//! request  = KEY SP SUBJECT ":" VERB [SP ARG] CR
//! response = VALUE CR | "ERROR: " KIND [SP "[" REQUEST "]"] SP DETAIL CR
//! ```

mod line;
mod verbs;

pub use line::{write_line, LineReader, MAX_LINE_LEN};
pub use verbs::{Access, Subject, Verb, VERB_TABLE};

use std::{error::Error as ErrorT, fmt::Display, str::FromStr};

/// Line terminator of every request and response
pub const TERMINATOR: u8 = b'\r';
/// Prefix of every error response
pub static ERROR_PREFIX: &str = "ERROR:";
/// Argument marking a request as a query
pub static QUERY: &str = "?";

#[derive(Debug, Clone, PartialEq)]
pub enum ProtoError {
    Io(String),
    /// Nothing arrived before the receive timeout
    Timeout,
    /// The peer hung up
    Closed,
    Malformed(String),
    UnknownSubject(String),
    UnknownVerb(String),
    BadArgument(String),
}

impl ProtoError {
    /// Name of the error kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        "ProtocolError"
    }
}

impl Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "i/o error: {}", e),
            Self::Timeout => write!(f, "timed out waiting for a line"),
            Self::Closed => write!(f, "connection closed"),
            Self::Malformed(line) => write!(f, "bad request {:?}", line),
            Self::UnknownSubject(subject) => write!(f, "unknown subject {:?}", subject),
            Self::UnknownVerb(verb) => write!(f, "unknown verb {:?}", verb),
            Self::BadArgument(why) => write!(f, "bad argument: {}", why),
        }
    }
}

impl ErrorT for ProtoError {}

impl From<std::io::Error> for ProtoError {
    fn from(value: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match value.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Self::Timeout,
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Io(value.to_string()),
        }
    }
}

/// What follows the verb
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Plain command, e.g. `AM:REDY`
    None,
    /// `?`
    Query,
    /// Literal value of a setter
    Value(String),
}

impl Arg {
    #[inline]
    pub fn is_query(&self) -> bool {
        *self == Self::Query
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// One parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: String,
    pub subject: Subject,
    pub verb: Verb,
    pub arg: Arg,
}

impl Request {
    pub fn query(key: &str, subject: Subject, verb: Verb) -> Self {
        Self {
            key: key.to_owned(),
            subject,
            verb,
            arg: Arg::Query,
        }
    }

    pub fn command(key: &str, subject: Subject, verb: Verb) -> Self {
        Self {
            key: key.to_owned(),
            subject,
            verb,
            arg: Arg::None,
        }
    }

    pub fn set(key: &str, subject: Subject, verb: Verb, value: impl Display) -> Self {
        Self {
            key: key.to_owned(),
            subject,
            verb,
            arg: Arg::Value(value.to_string()),
        }
    }

    /// Whether a response line is expected
    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.arg.is_query()
    }
}

impl FromStr for Request {
    type Err = ProtoError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_matches(|c| c == '\r' || c == '\n');
        let mut tokens = line.split_whitespace();

        let (key, command) = match (tokens.next(), tokens.next()) {
            (Some(key), Some(command)) => (key, command),
            _ => return Err(ProtoError::Malformed(line.to_owned())),
        };

        let arg = match (tokens.next(), tokens.next()) {
            (None, _) => Arg::None,
            (Some(arg), None) if arg == QUERY => Arg::Query,
            (Some(arg), None) => Arg::Value(arg.to_owned()),
            (Some(_), Some(_)) => return Err(ProtoError::Malformed(line.to_owned())),
        };

        let (subject, verb) = command
            .split_once(':')
            .ok_or_else(|| ProtoError::Malformed(line.to_owned()))?;

        let subject: Subject = subject.parse()?;
        let verb: Verb = verb.parse()?;

        let access = subject
            .access(verb)
            .ok_or_else(|| ProtoError::UnknownVerb(format!("{}:{}", subject, verb)))?;

        match (access, &arg) {
            (Access::Query, Arg::Query)
            | (Access::Command, Arg::None)
            | (Access::Setting, Arg::Query | Arg::Value(_)) => {}
            (Access::Query, _) => {
                return Err(ProtoError::BadArgument(format!(
                    "{}:{} is query only",
                    subject, verb
                )))
            }
            (Access::Command, _) => {
                return Err(ProtoError::BadArgument(format!(
                    "{}:{} takes no argument",
                    subject, verb
                )))
            }
            (Access::Setting, Arg::None) => {
                return Err(ProtoError::BadArgument(format!(
                    "{}:{} needs a value or ?",
                    subject, verb
                )))
            }
        }

        Ok(Self {
            key: key.to_owned(),
            subject,
            verb,
            arg,
        })
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.key, self.subject, self.verb)?;

        match &self.arg {
            Arg::None => Ok(()),
            Arg::Query => write!(f, " {}", QUERY),
            Arg::Value(v) => write!(f, " {}", v),
        }
    }
}

/// An `ERROR:` line. Errors caused by a request echo it in brackets,
/// asynchronous ones carry no request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    pub kind: String,
    pub request: Option<String>,
    pub detail: String,
}

impl ErrorLine {
    pub fn new(kind: &str, request: Option<&str>, detail: impl Display) -> Self {
        Self {
            kind: kind.to_owned(),
            request: request.map(str::to_owned),
            detail: detail.to_string(),
        }
    }

    #[inline]
    pub fn is_error(line: &str) -> bool {
        line.starts_with(ERROR_PREFIX)
    }
}

impl FromStr for ErrorLine {
    type Err = ProtoError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let rest = line
            .trim_end_matches(|c| c == '\r' || c == '\n')
            .strip_prefix(ERROR_PREFIX)
            .ok_or_else(|| ProtoError::Malformed(line.to_owned()))?
            .trim_start();

        let (kind, rest) = rest.split_once(' ').unwrap_or((rest, ""));

        if kind.is_empty() {
            return Err(ProtoError::Malformed(line.to_owned()));
        }

        let (request, detail) = match rest.strip_prefix('[') {
            Some(bracketed) => match bracketed.split_once(']') {
                Some((request, detail)) => (Some(request.to_owned()), detail.trim_start()),
                None => return Err(ProtoError::Malformed(line.to_owned())),
            },
            None => (None, rest),
        };

        Ok(Self {
            kind: kind.to_owned(),
            request,
            detail: detail.to_owned(),
        })
    }
}

impl Display for ErrorLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", ERROR_PREFIX, self.kind)?;

        if let Some(request) = &self.request {
            write!(f, " [{}]", request)?;
        }

        write!(f, " {}", self.detail)
    }
}

/// Format a float in its shortest natural decimal form, `60` rather than
/// `60.0`.
pub fn fmt_f32(value: f32) -> String {
    format!("{}", value)
}

/// Format a flag the way the protocol carries it
pub fn fmt_bool(value: bool) -> String {
    (value as u8).to_string()
}

/// Parse a flag given as an integer, anything non-zero is on
pub fn parse_bool(value: &str) -> Result<bool, ProtoError> {
    let value = value.trim();

    if let Ok(n) = value.parse::<i64>() {
        return Ok(n != 0);
    }

    match value.parse::<f32>() {
        Ok(n) if n.is_finite() => Ok(n != 0.0),
        _ => Err(ProtoError::BadArgument(format!("{:?} is not 0 or 1", value))),
    }
}

pub fn parse_f32(value: &str) -> Result<f32, ProtoError> {
    match value.trim().parse::<f32>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ProtoError::BadArgument(format!("{:?} is not a number", value))),
    }
}

pub fn parse_usize(value: &str) -> Result<usize, ProtoError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ProtoError::BadArgument(format!("{:?} is not a channel index", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query() {
        let request: Request = "top PD:SETP ?\r".parse().unwrap();

        assert_eq!(request, Request::query("top", Subject::PD, Verb::SETP));
        assert!(request.expects_reply());
    }

    #[test]
    fn parses_setter_and_command() {
        let request: Request = "mid PS:VSET 5".parse().unwrap();
        assert_eq!(request.arg.value(), Some("5"));
        assert!(!request.expects_reply());

        let request: Request = "bot AM:REDY".parse().unwrap();
        assert_eq!(request.arg, Arg::None);
    }

    #[test]
    fn formats_what_it_parses() {
        for line in ["top PD:SETP ?", "mid PS:VLIM 4.5", "bot AM:STOP"] {
            assert_eq!(line.parse::<Request>().unwrap().to_string(), line);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            "top".parse::<Request>(),
            Err(ProtoError::Malformed(_))
        ));
        assert!(matches!(
            "top PDSETP ?".parse::<Request>(),
            Err(ProtoError::Malformed(_))
        ));
        assert!(matches!(
            "top PD:SETP 1 2".parse::<Request>(),
            Err(ProtoError::Malformed(_))
        ));
        assert!(matches!(
            "top XX:SETP ?".parse::<Request>(),
            Err(ProtoError::UnknownSubject(_))
        ));
        assert!(matches!(
            "top PD:ZZZZ ?".parse::<Request>(),
            Err(ProtoError::UnknownVerb(_))
        ));
    }

    #[test]
    fn verb_must_belong_to_subject() {
        // TEMP exists, but only on the DAQ
        assert!(matches!(
            "top PS:TEMP ?".parse::<Request>(),
            Err(ProtoError::UnknownVerb(_))
        ));
    }

    #[test]
    fn argument_must_fit_access() {
        assert!(matches!(
            "top PS:VOLT 3".parse::<Request>(),
            Err(ProtoError::BadArgument(_))
        ));
        assert!(matches!(
            "top AM:REDY ?".parse::<Request>(),
            Err(ProtoError::BadArgument(_))
        ));
        assert!(matches!(
            "top PD:KPRO".parse::<Request>(),
            Err(ProtoError::BadArgument(_))
        ));
    }

    #[test]
    fn error_line_with_request() {
        let error = ErrorLine::new("BadKey", Some("oven PD:SETP ?"), "no zone \"oven\"");
        let text = error.to_string();

        assert_eq!(text, "ERROR: BadKey [oven PD:SETP ?] no zone \"oven\"");
        assert_eq!(text.parse::<ErrorLine>().unwrap(), error);
    }

    #[test]
    fn error_line_without_request() {
        let line = "ERROR: SafetyTrip top: temperature 95.00 exceeded limit 80.00, output off\r";
        let error: ErrorLine = line.parse().unwrap();

        assert_eq!(error.kind, "SafetyTrip");
        assert_eq!(error.request, None);
        assert!(error.detail.starts_with("top: temperature 95.00"));
        assert!(ErrorLine::is_error(line));
        assert!(!ErrorLine::is_error("60"));
    }

    #[test]
    fn natural_number_formats() {
        assert_eq!(fmt_f32(60.0), "60");
        assert_eq!(fmt_f32(0.03), "0.03");
        assert_eq!(fmt_bool(true), "1");
    }

    #[test]
    fn flags_coerce_from_ints() {
        assert!(parse_bool("1").unwrap());
        assert!(parse_bool("2").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(!parse_bool("0.0").unwrap());
        assert!(parse_bool("yes").is_err());
        assert!(parse_f32("nan").is_err());
    }
}
