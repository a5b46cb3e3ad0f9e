use std::{fmt::Display, str::FromStr};

use crate::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Power supply channel of the zone
    PS,
    /// Thermocouple input of the zone
    DQ,
    /// Control law of the zone
    PD,
    /// The zone as a whole
    AM,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    IDN,
    RSET,
    STOP,
    REDY,
    VOLT,
    AMPS,
    VSET,
    ASET,
    VLIM,
    ALIM,
    CHIO,
    CHAN,
    TEMP,
    TCTY,
    UNIT,
    RLIM,
    KPRO,
    KINT,
    KDER,
    SETP,
    SAMP,
    REGT,
    STAT,
    TICK,
    RERR,
    LIST,
}

/// How a verb may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `?` only, answered with a value
    Query,
    /// No argument, no answer
    Command,
    /// `?` to read, a value to write
    Setting,
}

/// Every verb each subject understands
pub const VERB_TABLE: &[(Subject, Verb, Access)] = &[
    (Subject::PS, Verb::IDN, Access::Query),
    (Subject::PS, Verb::RSET, Access::Command),
    (Subject::PS, Verb::STOP, Access::Command),
    (Subject::PS, Verb::REDY, Access::Command),
    (Subject::PS, Verb::VOLT, Access::Query),
    (Subject::PS, Verb::AMPS, Access::Query),
    (Subject::PS, Verb::VSET, Access::Setting),
    (Subject::PS, Verb::ASET, Access::Setting),
    (Subject::PS, Verb::VLIM, Access::Setting),
    (Subject::PS, Verb::ALIM, Access::Setting),
    (Subject::PS, Verb::CHIO, Access::Setting),
    (Subject::PS, Verb::CHAN, Access::Setting),
    (Subject::DQ, Verb::IDN, Access::Query),
    (Subject::DQ, Verb::TEMP, Access::Query),
    (Subject::DQ, Verb::CHAN, Access::Setting),
    (Subject::DQ, Verb::TCTY, Access::Setting),
    (Subject::DQ, Verb::UNIT, Access::Setting),
    (Subject::PD, Verb::IDN, Access::Query),
    (Subject::PD, Verb::RSET, Access::Command),
    (Subject::PD, Verb::RLIM, Access::Command),
    (Subject::PD, Verb::KPRO, Access::Setting),
    (Subject::PD, Verb::KINT, Access::Setting),
    (Subject::PD, Verb::KDER, Access::Setting),
    (Subject::PD, Verb::SETP, Access::Setting),
    (Subject::PD, Verb::SAMP, Access::Setting),
    (Subject::PD, Verb::REGT, Access::Setting),
    (Subject::AM, Verb::STOP, Access::Command),
    (Subject::AM, Verb::RSET, Access::Command),
    (Subject::AM, Verb::REDY, Access::Command),
    (Subject::AM, Verb::STAT, Access::Query),
    (Subject::AM, Verb::TICK, Access::Query),
    (Subject::AM, Verb::RERR, Access::Query),
    (Subject::AM, Verb::LIST, Access::Query),
];

impl Subject {
    /// How `verb` may be used on this subject, `None` if it is not understood
    pub fn access(&self, verb: Verb) -> Option<Access> {
        VERB_TABLE
            .iter()
            .find(|(subject, v, _)| subject == self && *v == verb)
            .map(|(_, _, access)| *access)
    }
}

impl FromStr for Subject {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PS" => Ok(Self::PS),
            "DQ" => Ok(Self::DQ),
            "PD" => Ok(Self::PD),
            "AM" => Ok(Self::AM),
            _ => Err(ProtoError::UnknownSubject(s.to_owned())),
        }
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Verb {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "IDN" => Self::IDN,
            "RSET" => Self::RSET,
            "STOP" => Self::STOP,
            "REDY" => Self::REDY,
            "VOLT" => Self::VOLT,
            "AMPS" => Self::AMPS,
            "VSET" => Self::VSET,
            "ASET" => Self::ASET,
            "VLIM" => Self::VLIM,
            "ALIM" => Self::ALIM,
            "CHIO" => Self::CHIO,
            "CHAN" => Self::CHAN,
            "TEMP" => Self::TEMP,
            "TCTY" => Self::TCTY,
            "UNIT" => Self::UNIT,
            "RLIM" => Self::RLIM,
            "KPRO" => Self::KPRO,
            "KINT" => Self::KINT,
            "KDER" => Self::KDER,
            "SETP" => Self::SETP,
            "SAMP" => Self::SAMP,
            "REGT" => Self::REGT,
            "STAT" => Self::STAT,
            "TICK" => Self::TICK,
            "RERR" => Self::RERR,
            "LIST" => Self::LIST,
            _ => return Err(ProtoError::UnknownVerb(s.to_owned())),
        })
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicates() {
        for (i, (subject, verb, _)) in VERB_TABLE.iter().enumerate() {
            assert!(
                !VERB_TABLE[i + 1..]
                    .iter()
                    .any(|(s, v, _)| s == subject && v == verb),
                "{}:{} listed twice",
                subject,
                verb
            );
        }
    }

    #[test]
    fn verbs_spell_themselves() {
        for (_, verb, _) in VERB_TABLE {
            assert_eq!(verb.to_string().parse::<Verb>().unwrap(), *verb);
        }
    }

    #[test]
    fn subjects_own_their_verbs() {
        assert_eq!(Subject::PS.access(Verb::VSET), Some(Access::Setting));
        assert_eq!(Subject::DQ.access(Verb::TEMP), Some(Access::Query));
        assert_eq!(Subject::AM.access(Verb::REDY), Some(Access::Command));
        assert_eq!(Subject::AM.access(Verb::VSET), None);
    }
}
