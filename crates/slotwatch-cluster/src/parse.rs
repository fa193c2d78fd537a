//! Parsers for the textual introspection replies.
//!
//! Every field access is checked. A parser either returns complete data
//! or a [`ParseError`]; it never hands back a partially filled result.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::error::ParseError;
use crate::slots::SlotRange;
use crate::topology::{join_host_port, ClusterSlot, Node, NodeFlags, NodeId, Role, SlotNode};

/// Index of the first slot token in a CLUSTER NODES line.
const SLOTS_FIELD: usize = 8;

/// Positional fields of a node line, with checked access.
struct NodeLine<'a> {
    line: &'a str,
    fields: Vec<&'a str>,
}

impl<'a> NodeLine<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line,
            fields: line.split_whitespace().collect(),
        }
    }

    fn field(&self, index: usize, name: &'static str) -> Result<&'a str, ParseError> {
        self.fields
            .get(index)
            .copied()
            .ok_or_else(|| ParseError::MissingField {
                field: name,
                index,
                line: self.line.to_string(),
            })
    }
}

/// Host part of an `ip:port@cport[,hostname]` address.
fn host_of(addr: &str) -> &str {
    let addr = addr.split(',').next().unwrap_or(addr);
    let addr = addr.split('@').next().unwrap_or(addr);
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

fn parse_slot_bound(value: &str) -> Result<u32, ParseError> {
    value
        .parse()
        .map_err(|e| ParseError::invalid_integer("slot", value, e))
}

/// Parses `N` or `N-M` into a range.
fn parse_slot_token(token: &str) -> Result<SlotRange, ParseError> {
    match token.split_once('-') {
        Some((start, end)) => SlotRange::try_new(parse_slot_bound(start)?, parse_slot_bound(end)?),
        None => {
            let slot = parse_slot_bound(token)?;
            SlotRange::try_new(slot, slot)
        }
    }
}

/// Tokens like `[93->-e7d1...]` describe a migration in flight.
fn is_migration_token(token: &str) -> bool {
    token.starts_with('[') && token.ends_with(']')
}

/// Parses one line of CLUSTER NODES output.
///
/// Field layout: id, address, flags, master id, ping sent, pong received,
/// config epoch, link state, then slot tokens for masters. The role is
/// `slave` if the flags mention it and `master` otherwise.
pub fn parse_node_line(line: &str) -> Result<Node, ParseError> {
    let record = NodeLine::new(line.trim());

    let id = record.field(0, "id")?;
    let addr = record.field(1, "address")?;
    let flags = record.field(2, "flags")?;
    let master = record.field(3, "master id")?;
    record.field(7, "link state")?;

    let role = if flags.contains("slave") {
        Role::Slave {
            master: NodeId::new(master),
        }
    } else {
        let slots = record
            .fields
            .iter()
            .skip(SLOTS_FIELD)
            .filter(|token| !is_migration_token(token))
            .map(|token| parse_slot_token(token))
            .collect::<Result<Vec<_>, _>>()?;
        Role::Master { slots }
    };

    Ok(Node {
        id: NodeId::new(id),
        host: host_of(addr).to_string(),
        role,
        flags: NodeFlags::parse(flags),
    })
}

/// Parses the answering node's own line out of a CLUSTER NODES reply.
///
/// Stops at the first line containing `myself`.
pub fn parse_myself(reply: &str) -> Result<Node, ParseError> {
    reply
        .lines()
        .map(str::trim)
        .find(|line| line.contains("myself"))
        .ok_or(ParseError::MissingSelf)
        .and_then(parse_node_line)
}

/// Parses every line of a CLUSTER NODES reply.
pub fn parse_cluster_nodes(reply: &str) -> Result<Vec<Node>, ParseError> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_node_line)
        .collect()
}

/// Parses a CLUSTER SLAVES reply. Same line format as CLUSTER NODES.
pub fn parse_cluster_slaves(reply: &str) -> Result<Vec<Node>, ParseError> {
    parse_cluster_nodes(reply)
}

/// Parses the flattened CLUSTER SLOTS reply.
///
/// The tool prints one token per line. Tokens come in groups: range start,
/// range end, then an (ip, port, id) triple for as long as the next token
/// is an IP literal. The first triple is the master.
pub fn parse_cluster_slots(reply: &str) -> Result<Vec<ClusterSlot>, ParseError> {
    let tokens: Vec<&str> = reply
        .trim()
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    let mut slots = Vec::new();
    let mut pos = 0;
    while pos < tokens.len() {
        let group = slots.len();
        let take = |pos: usize, expected: &'static str| {
            tokens.get(pos).copied().ok_or(ParseError::Truncated {
                group,
                position: pos,
                expected,
            })
        };

        let start = parse_slot_bound(take(pos, "range start")?)?;
        let end = parse_slot_bound(take(pos + 1, "range end")?)?;
        let range = SlotRange::try_new(start, end)?;
        pos += 2;

        let mut nodes = Vec::new();
        while let Some(ip) = tokens.get(pos).filter(|t| t.parse::<IpAddr>().is_ok()) {
            let port = take(pos + 1, "port")?;
            let id = take(pos + 2, "node id")?;
            port.parse::<u16>()
                .map_err(|e| ParseError::invalid_integer("port", port, e))?;
            nodes.push(SlotNode::new(id, join_host_port(ip, port)));
            pos += 3;
        }

        slots.push(ClusterSlot::new(range, nodes));
    }
    Ok(slots)
}

/// Typed view of a CLUSTER INFO reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ClusterInfo {
    pub state: Option<String>,
    pub slots_assigned: Option<u32>,
    pub slots_ok: Option<u32>,
    pub known_nodes: Option<u32>,
    pub size: Option<u32>,
    /// Every `key:value` line, including the ones above.
    pub fields: BTreeMap<String, String>,
}

impl ClusterInfo {
    /// Returns true if the node reports `cluster_state:ok`.
    pub fn is_ok(&self) -> bool {
        self.state.as_deref() == Some("ok")
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Parses `key:value` lines; lines without a colon are ignored.
pub fn parse_cluster_info(reply: &str) -> Result<ClusterInfo, ParseError> {
    let fields: BTreeMap<String, String> = reply
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let number = |field: &'static str| -> Result<Option<u32>, ParseError> {
        fields
            .get(field)
            .map(|v| v.parse().map_err(|e| ParseError::invalid_integer(field, v, e)))
            .transpose()
    };

    Ok(ClusterInfo {
        state: fields.get("cluster_state").cloned(),
        slots_assigned: number("cluster_slots_assigned")?,
        slots_ok: number("cluster_slots_ok")?,
        known_nodes: number("cluster_known_nodes")?,
        size: number("cluster_size")?,
        fields,
    })
}

/// Parses an integer reply such as DBSIZE or COUNTKEYSINSLOT.
///
/// Accepts the `(integer) ` prefix printed on a terminal.
pub fn parse_integer(field: &'static str, reply: &str) -> Result<i64, ParseError> {
    let value = reply.trim();
    let value = value.strip_prefix("(integer) ").unwrap_or(value);
    value
        .parse()
        .map_err(|e| ParseError::invalid_integer(field, value, e))
}

/// Parses CONFIG GET output: alternating name and value lines.
///
/// Values may be empty, so lines are split on `\n` without dropping
/// blank entries.
pub fn parse_config_get(reply: &str) -> Result<Vec<(String, String)>, ParseError> {
    if reply.is_empty() {
        return Ok(Vec::new());
    }
    let lines: Vec<&str> = reply.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let mut pairs = lines.chunks_exact(2);
    let params: Vec<(String, String)> = pairs
        .by_ref()
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect();
    match pairs.remainder() {
        [] => Ok(params),
        [name, ..] => Err(ParseError::UnpairedConfig(name.to_string())),
    }
}
