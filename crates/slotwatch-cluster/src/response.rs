//! Classification of raw command replies.
//!
//! The CLI tool prints errors to stdout like any other reply, so success
//! and failure have to be told apart by content. Classification walks an
//! ordered rule table and stops at the first match.

use std::net::IpAddr;

use crate::error::ProtocolError;
use crate::slots::MAX_SLOT;

/// The reply that marks an acknowledged write or admin command.
pub const OK: &str = "OK";

/// Known failure conditions a reply can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionReset,
    UnknownSubcommand,
    UnknownCommand,
    WrongArgumentCount,
    Moved,
    InvalidSlot,
    UnknownNode,
    FailoverNotReplica,
    NotFound,
    NotMaster,
    NotSlave,
    ReadOnlyReplica,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConnectionReset => "connection reset",
            ErrorKind::UnknownSubcommand => "unknown subcommand",
            ErrorKind::UnknownCommand => "unknown command",
            ErrorKind::WrongArgumentCount => "wrong number of arguments",
            ErrorKind::Moved => "redirect",
            ErrorKind::InvalidSlot => "invalid slot",
            ErrorKind::UnknownNode => "unknown node",
            ErrorKind::FailoverNotReplica => "failover sent to a master",
            ErrorKind::NotFound => "not found",
            ErrorKind::NotMaster => "not a master",
            ErrorKind::NotSlave => "not a slave",
            ErrorKind::ReadOnlyReplica => "read-only replica",
        };
        write!(f, "{name}")
    }
}

/// How a rule recognizes its condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// The reply contains the pattern anywhere.
    Contains(String),
    /// The reply is a structurally valid MOVED redirect.
    Redirect,
}

impl Matcher {
    pub fn matches(&self, reply: &str) -> bool {
        match self {
            Matcher::Contains(pattern) => reply.contains(pattern.as_str()),
            Matcher::Redirect => parse_redirect(reply).is_some(),
        }
    }
}

/// One entry of the classification table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub matcher: Matcher,
    pub kind: ErrorKind,
}

impl Rule {
    pub fn contains(pattern: &str, kind: ErrorKind) -> Self {
        Self {
            matcher: Matcher::Contains(pattern.to_string()),
            kind,
        }
    }

    pub fn redirect() -> Self {
        Self {
            matcher: Matcher::Redirect,
            kind: ErrorKind::Moved,
        }
    }
}

/// A parsed `MOVED <slot> <host>:<port>` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub slot: u16,
    pub ip: IpAddr,
    /// The address token as sent, port included.
    pub addr: String,
}

/// Parses a redirect, validating every piece.
///
/// The first token must be exactly `MOVED`, the slot must be in range and
/// the host must be an IP literal. Anything short of that is not a
/// redirect.
pub fn parse_redirect(reply: &str) -> Option<Redirect> {
    let mut tokens = reply.split_whitespace();
    if tokens.next()? != "MOVED" {
        return None;
    }
    let slot: u16 = tokens.next()?.parse().ok()?;
    if slot > MAX_SLOT {
        return None;
    }
    let addr = tokens.next()?;
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = host.parse().ok()?;
    Some(Redirect {
        slot,
        ip,
        addr: addr.to_string(),
    })
}

/// Removes the line ending the tool prints after every reply: one `\n`,
/// then one `\r`. Anything before that is payload.
pub fn trim_reply(raw: &str) -> &str {
    let trimmed = raw.strip_suffix('\n').unwrap_or(raw);
    trimmed.strip_suffix('\r').unwrap_or(trimmed)
}

/// Ordered rule table applied to every reply.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    rules: Vec<Rule>,
}

impl Default for ResponseClassifier {
    /// The standard table, in priority order.
    fn default() -> Self {
        Self::with_rules(vec![
            Rule::contains("Connection reset by peer", ErrorKind::ConnectionReset),
            Rule::contains(
                "ERR Unknown subcommand or wrong number of arguments",
                ErrorKind::UnknownSubcommand,
            ),
            Rule::contains("ERR unknown command", ErrorKind::UnknownCommand),
            Rule::contains("ERR wrong number of arguments", ErrorKind::WrongArgumentCount),
            Rule::redirect(),
            Rule::contains("ERR Invalid slot", ErrorKind::InvalidSlot),
            Rule::contains("ERR Unknown node", ErrorKind::UnknownNode),
            Rule::contains(
                "ERR You should send CLUSTER FAILOVER to a replica",
                ErrorKind::FailoverNotReplica,
            ),
            Rule::contains("not found", ErrorKind::NotFound),
            Rule::contains("ERR The specified node is not a master", ErrorKind::NotMaster),
            Rule::contains("ERR The specified node is not a slave", ErrorKind::NotSlave),
            Rule::contains(
                "READONLY You can't write against a read only replica",
                ErrorKind::ReadOnlyReplica,
            ),
        ])
    }
}

impl ResponseClassifier {
    /// Uses `rules` as the whole table, tried first to last.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Returns the trimmed reply, or the first rule it matches as an error.
    ///
    /// An exact `OK` short-circuits the table. Replies matching nothing
    /// are payloads and come back unchanged.
    pub fn classify(&self, raw: &str) -> Result<String, ProtocolError> {
        let reply = trim_reply(raw);
        if reply == OK {
            return Ok(reply.to_string());
        }
        match self.rules.iter().find(|rule| rule.matcher.matches(reply)) {
            Some(rule) => Err(ProtocolError {
                kind: rule.kind,
                raw: reply.to_string(),
            }),
            None => Ok(reply.to_string()),
        }
    }
}
