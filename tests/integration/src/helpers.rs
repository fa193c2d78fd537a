//! An in-memory cluster that answers like `redis-cli` run through
//! `kubectl exec`.
//!
//! Members are addressed the way the real executor addresses them,
//! `<name>-shard<i>-<j>`, and reply with the same text the tool prints
//! when stdout is not a terminal. Keys are kept per shard with no hash
//! slot routing.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use slotwatch_cluster::{
    ClusterClient, ClusterConfig, ClusterSlot, ExpectedShape, NodeTarget, RemoteExecutor,
    ShardTopology, SlotRange, TransportError, SLOT_COUNT,
};

/// One executed command, as the executor saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub target: String,
    pub argv: Vec<String>,
}

impl Call {
    /// The command tokens with the tool name and its flags removed.
    pub fn tokens(&self) -> Vec<String> {
        command_tokens(&self.argv).0
    }
}

#[derive(Debug, Clone)]
struct FakeNode {
    id: String,
    host: String,
    /// Arena index of the followed master; `None` for masters.
    master: Option<usize>,
}

struct State {
    nodes: Vec<FakeNode>,
    /// Arena indices, laid out as member rows.
    rows: Vec<Vec<usize>>,
    /// Arena index of the master owning each slot.
    owner: Vec<Option<usize>>,
    keys: Vec<BTreeMap<String, String>>,
    config: BTreeMap<String, String>,
    down: HashSet<String>,
    injected: HashMap<String, VecDeque<String>>,
    calls: Vec<Call>,
    /// Ranges missing from CLUSTER SLOTS while a change propagates.
    hidden: Vec<SlotRange>,
    hidden_reads: u32,
    lag: u32,
    epoch: u64,
}

/// A scripted cluster implementing [`RemoteExecutor`].
pub struct FakeCluster {
    name: String,
    state: Mutex<State>,
}

impl FakeCluster {
    /// A healthy cluster with slots split evenly across `masters`.
    pub fn new(name: &str, masters: usize, replicas: usize) -> Self {
        let mut state = State {
            nodes: Vec::new(),
            rows: Vec::new(),
            owner: vec![None; SLOT_COUNT as usize],
            keys: Vec::new(),
            config: BTreeMap::from([
                ("cluster-enabled".to_string(), "yes".to_string()),
                ("maxmemory".to_string(), "0".to_string()),
                ("cluster-announce-ip".to_string(), String::new()),
            ]),
            down: HashSet::new(),
            injected: HashMap::new(),
            calls: Vec::new(),
            hidden: Vec::new(),
            hidden_reads: 0,
            lag: 0,
            epoch: 1,
        };
        for _ in 0..masters {
            state.push_row(replicas);
        }
        for (i, range) in even_split(masters).into_iter().enumerate() {
            let master = state.rows[i][0];
            state.assign(range, master);
        }
        Self {
            name: name.to_string(),
            state: Mutex::new(state),
        }
    }

    /// After every change, hide the affected slots from the next `reads`
    /// CLUSTER SLOTS replies.
    pub fn with_lag(self, reads: u32) -> Self {
        self.lock().lag = reads;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Config matching the current layout, with a fast retry policy.
    pub fn config(&self) -> ClusterConfig {
        let st = self.lock();
        let masters = st.rows.len();
        let replicas = st.rows.first().map_or(0, |r| r.len() - 1);
        let mut config = ClusterConfig {
            name: self.name.clone(),
            shape: ExpectedShape::new(masters, replicas),
            ..ClusterConfig::default()
        };
        config.retry.max_attempts = 10;
        config
    }

    /// A client for the current layout.
    pub fn client(&self) -> ClusterClient<&FakeCluster> {
        ClusterClient::new(self.config(), self).unwrap()
    }

    pub fn target(&self, shard: usize, replica: usize) -> NodeTarget {
        NodeTarget::cluster(&self.name, shard, replica)
    }

    /// Node ID of the member at (shard, replica).
    pub fn id(&self, shard: usize, replica: usize) -> String {
        let st = self.lock();
        st.nodes[st.rows[shard][replica]].id.clone()
    }

    /// Makes a member unreachable: the executor fails for it.
    pub fn take_down(&self, target: &NodeTarget) {
        self.lock().down.insert(target.name().to_string());
    }

    /// Queues a raw reply that `target` returns for its next command.
    pub fn inject(&self, target: &NodeTarget, raw: &str) {
        self.lock()
            .injected
            .entry(target.name().to_string())
            .or_default()
            .push_back(raw.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Adds a shard and moves slots to its master so every master ends
    /// up with an even share, taken from the low end of each donor.
    pub fn add_master(&self) {
        let mut st = self.lock();
        let replicas = st.rows.first().map_or(0, |r| r.len() - 1);
        let donors: Vec<usize> = st.rows.iter().filter_map(|row| st.master_in(row)).collect();
        let row = st.push_row(replicas);
        let new_master = st.rows[row][0];
        let share = SLOT_COUNT as u32 / (donors.len() as u32 + 1);

        let mut moved = Vec::new();
        for donor in donors {
            let owned = st.ranges_of(donor);
            let excess = owned.iter().map(SlotRange::len).sum::<u32>().saturating_sub(share);
            let mut left = excess;
            for range in owned {
                if left == 0 {
                    break;
                }
                let take = left.min(range.len());
                let chunk = SlotRange::new(range.start, range.start + (take - 1) as u16);
                st.assign(chunk, new_master);
                moved.push(chunk);
                left -= take;
            }
        }
        st.begin_change(moved);
    }

    /// Removes the last shard, handing its ranges round-robin to the
    /// remaining masters.
    pub fn remove_master(&self) {
        let mut st = self.lock();
        let Some(row) = st.rows.pop() else { return };
        st.keys.pop();
        let leaving = st.master_in(&row);
        let heirs: Vec<usize> = st.rows.iter().filter_map(|r| st.master_in(r)).collect();
        let ranges = leaving.map(|m| st.ranges_of(m)).unwrap_or_default();
        if !heirs.is_empty() {
            for (k, range) in ranges.iter().enumerate() {
                st.assign(*range, heirs[k % heirs.len()]);
            }
        }
        st.begin_change(ranges);
    }

    /// Adds one slave to every shard.
    pub fn add_replica(&self) {
        let mut st = self.lock();
        for i in 0..st.rows.len() {
            let Some(master) = st.master_in(&st.rows[i]) else { continue };
            let node = st.new_node(Some(master));
            st.rows[i].push(node);
        }
        st.epoch += 1;
    }

    /// Removes the highest-index member of every shard. A master there
    /// first fails over to the shard's first remaining slave.
    pub fn remove_replica(&self) {
        let mut st = self.lock();
        let mut changed = Vec::new();
        for i in 0..st.rows.len() {
            let Some(&last) = st.rows[i].last() else { continue };
            if st.nodes[last].master.is_none() {
                let heir = st.rows[i].iter().copied().find(|&n| n != last);
                if let Some(heir) = heir {
                    changed.extend(st.promote(heir));
                }
            }
            st.rows[i].pop();
        }
        st.begin_change(changed);
    }

    /// Marks the master of `shard` as failed and promotes its first slave
    /// without a CLUSTER FAILOVER request.
    pub fn kill_master(&self, shard: usize) {
        let mut st = self.lock();
        let row = st.rows[shard].clone();
        let Some(master) = st.master_in(&row) else { return };
        let Some(heir) = row.iter().copied().find(|&n| st.nodes[n].master == Some(master)) else {
            return;
        };
        let moved = st.promote(heir);
        st.begin_change(moved);
    }
}

impl RemoteExecutor for FakeCluster {
    fn execute(&self, target: &NodeTarget, argv: &[String]) -> Result<String, TransportError> {
        let mut st = self.lock();
        st.calls.push(Call {
            target: target.name().to_string(),
            argv: argv.to_vec(),
        });

        if st.down.contains(target.name()) {
            return Err(TransportError::new(
                target.name(),
                "error: unable to upgrade connection: container not found",
            ));
        }
        if let Some(raw) = st
            .injected
            .get_mut(target.name())
            .and_then(VecDeque::pop_front)
        {
            return Ok(raw);
        }

        let shard = target.shard().unwrap_or(0);
        let Some(me) = st.rows.get(shard).and_then(|r| r.get(target.replica())).copied() else {
            return Err(TransportError::new(
                target.name(),
                format!("pods \"{}\" not found", target.name()),
            ));
        };

        let (tokens, _) = command_tokens(argv);
        let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
        Ok(format!("{}\n", st.reply(me, shard, &tokens)))
    }
}

/// Builds the slot entries a test expects, resolving each range's nodes
/// from a snapshot.
///
/// Panics if a range has no owning master in the snapshot.
pub fn expected_slots(topology: &ShardTopology, ranges: &[(u16, u16)]) -> Vec<ClusterSlot> {
    ranges
        .iter()
        .map(|&(start, end)| {
            let nodes = topology
                .nodes_for_range(start, end)
                .unwrap_or_else(|| panic!("no master owns {start}-{end}"));
            ClusterSlot::new(SlotRange::new(start, end), nodes)
        })
        .collect()
}

/// Splits an argv into command tokens and whether `-c` was passed.
fn command_tokens(argv: &[String]) -> (Vec<String>, bool) {
    let mut rest = argv.get(1..).unwrap_or_default();
    let mut follow = false;
    loop {
        match rest.first().map(String::as_str) {
            Some("--tls") => rest = &rest[1..],
            Some("--cert" | "--key" | "--cacert") => rest = rest.get(2..).unwrap_or_default(),
            Some("-c") => {
                follow = true;
                rest = &rest[1..];
            }
            _ => break,
        }
    }
    (rest.to_vec(), follow)
}

/// Even slot split, the way cluster creation assigns slots.
fn even_split(masters: usize) -> Vec<SlotRange> {
    if masters == 0 {
        return Vec::new();
    }
    let per = f64::from(SLOT_COUNT) / masters as f64;
    let mut ranges = Vec::with_capacity(masters);
    let mut first = 0u16;
    let mut cursor = 0f64;
    for i in 0..masters {
        let last = if i + 1 == masters {
            SLOT_COUNT - 1
        } else {
            (cursor + per - 1.0).round() as u16
        };
        ranges.push(SlotRange::new(first, last));
        first = last + 1;
        cursor += per;
    }
    ranges
}

impl State {
    fn new_node(&mut self, master: Option<usize>) -> usize {
        let seq = self.nodes.len() as u32 + 1;
        self.nodes.push(FakeNode {
            id: format!("{:08x}{:032x}", seq.wrapping_mul(0x9e37_79b1), seq),
            host: format!("10.0.{}.{}", seq / 250, seq % 250 + 1),
            master,
        });
        self.nodes.len() - 1
    }

    /// Appends a shard row with a master and `replicas` slaves.
    fn push_row(&mut self, replicas: usize) -> usize {
        let master = self.new_node(None);
        let mut row = vec![master];
        for _ in 0..replicas {
            row.push(self.new_node(Some(master)));
        }
        self.rows.push(row);
        self.keys.push(BTreeMap::new());
        self.rows.len() - 1
    }

    fn master_in(&self, row: &[usize]) -> Option<usize> {
        row.iter().copied().find(|&n| self.nodes[n].master.is_none())
    }

    fn assign(&mut self, range: SlotRange, node: usize) {
        for slot in range.iter() {
            self.owner[slot as usize] = Some(node);
        }
    }

    /// Contiguous runs of slots owned by `node`, in slot order.
    fn ranges_of(&self, node: usize) -> Vec<SlotRange> {
        self.runs()
            .into_iter()
            .filter(|(_, owner)| *owner == node)
            .map(|(range, _)| range)
            .collect()
    }

    /// Every maximal run of slots with a single owner.
    fn runs(&self) -> Vec<(SlotRange, usize)> {
        let mut runs = Vec::new();
        let mut current: Option<(u16, usize)> = None;
        for (slot, owner) in self.owner.iter().enumerate() {
            let slot = slot as u16;
            match (current, *owner) {
                (Some((_, held)), Some(o)) if held == o => {}
                (Some((start, held)), next) => {
                    runs.push((SlotRange::new(start, slot - 1), held));
                    current = next.map(|o| (slot, o));
                }
                (None, next) => current = next.map(|o| (slot, o)),
            }
        }
        if let Some((start, held)) = current {
            runs.push((SlotRange::new(start, SLOT_COUNT - 1), held));
        }
        runs
    }

    /// Makes `slave` the master of its shard, taking over the old master's
    /// slots and slaves. Returns the slots that changed hands.
    fn promote(&mut self, slave: usize) -> Vec<SlotRange> {
        let Some(old) = self.nodes[slave].master else {
            return Vec::new();
        };
        let moved = self.ranges_of(old);
        for range in &moved {
            self.assign(*range, slave);
        }
        for node in &mut self.nodes {
            if node.master == Some(old) {
                node.master = Some(slave);
            }
        }
        self.nodes[slave].master = None;
        self.nodes[old].master = Some(slave);
        moved
    }

    fn begin_change(&mut self, affected: Vec<SlotRange>) {
        self.epoch += 1;
        self.hidden = affected;
        self.hidden_reads = self.lag;
    }

    fn reply(&mut self, me: usize, shard: usize, tokens: &[&str]) -> String {
        let is_slave = self.nodes[me].master.is_some();
        match tokens {
            ["PING"] => "PONG".into(),
            ["SET", key, value] => {
                self.keys[shard].insert(key.to_string(), value.to_string());
                "OK".into()
            }
            ["GET", key] => self.keys[shard].get(*key).cloned().unwrap_or_default(),
            ["DEL", key] => match self.keys[shard].remove(*key) {
                Some(_) => "1".into(),
                None => "0".into(),
            },
            ["RANDOMKEY"] => self.keys[shard].keys().next().cloned().unwrap_or_default(),
            ["DBSIZE"] => self.keys[shard].len().to_string(),
            ["FLUSHDB"] if is_slave => {
                "READONLY You can't write against a read only replica.".into()
            }
            ["FLUSHDB"] => {
                self.keys[shard].clear();
                "OK".into()
            }
            ["CONFIG", "GET", param] => match self.config.get(*param) {
                Some(value) => format!("{param}\n{value}"),
                None => String::new(),
            },
            ["CLUSTER", sub, args @ ..] => self.cluster_reply(me, sub, args),
            [] => "ERR wrong number of arguments".into(),
            [cmd, ..] => format!("ERR unknown command '{cmd}', with args beginning with: "),
        }
    }

    fn cluster_reply(&mut self, me: usize, sub: &str, args: &[&str]) -> String {
        match (sub, args) {
            ("INFO", []) => self.cluster_info(),
            ("NODES", []) => self.cluster_nodes(me),
            ("SLOTS", []) => self.cluster_slots(),
            ("SAVECONFIG", []) => "OK".into(),
            ("COUNTKEYSINSLOT", [slot]) => match slot.parse::<u16>() {
                Ok(s) if s < SLOT_COUNT => "0".into(),
                _ => "ERR Invalid slot".into(),
            },
            ("COUNT-FAILURE-REPORTS", [id]) => match self.find(id) {
                Some(_) => "0".into(),
                None => format!("ERR Unknown node {id}"),
            },
            ("SLAVES", [id]) => match self.find(id) {
                None => format!("ERR Unknown node {id}"),
                Some(n) if self.nodes[n].master.is_some() => {
                    "ERR The specified node is not a master".into()
                }
                Some(n) => {
                    let lines: Vec<String> = (0..self.nodes.len())
                        .filter(|&s| self.nodes[s].master == Some(n) && self.is_member(s))
                        .map(|s| self.node_line(s, me))
                        .collect();
                    lines.join("\n")
                }
            },
            ("FAILOVER", []) => {
                if self.nodes[me].master.is_none() {
                    return "ERR You should send CLUSTER FAILOVER to a replica".into();
                }
                let moved = self.promote(me);
                self.begin_change(moved);
                "OK".into()
            }
            _ => format!(
                "ERR Unknown subcommand or wrong number of arguments for '{sub}'. Try CLUSTER HELP."
            ),
        }
    }

    fn members(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().flatten().copied()
    }

    fn is_member(&self, node: usize) -> bool {
        self.members().any(|n| n == node)
    }

    fn find(&self, id: &str) -> Option<usize> {
        self.members().find(|&n| self.nodes[n].id == id)
    }

    fn cluster_info(&self) -> String {
        let assigned = self.owner.iter().filter(|o| o.is_some()).count();
        let masters_with_slots: HashSet<usize> = self.owner.iter().flatten().copied().collect();
        let state = if assigned == SLOT_COUNT as usize { "ok" } else { "fail" };
        [
            format!("cluster_state:{state}"),
            format!("cluster_slots_assigned:{assigned}"),
            format!("cluster_slots_ok:{assigned}"),
            "cluster_slots_pfail:0".into(),
            "cluster_slots_fail:0".into(),
            format!("cluster_known_nodes:{}", self.members().count()),
            format!("cluster_size:{}", masters_with_slots.len()),
            format!("cluster_current_epoch:{}", self.epoch),
            format!("cluster_my_epoch:{}", self.epoch),
        ]
        .join("\r\n")
    }

    fn node_line(&self, node: usize, me: usize) -> String {
        let n = &self.nodes[node];
        let role = if n.master.is_some() { "slave" } else { "master" };
        let flags = if node == me {
            format!("myself,{role}")
        } else {
            role.to_string()
        };
        let master = n.master.map_or("-".to_string(), |m| self.nodes[m].id.clone());
        let mut line = format!(
            "{} {}:6379@16379 {flags} {master} 0 1600000000000 {} connected",
            n.id, n.host, self.epoch
        );
        if n.master.is_none() {
            for range in self.ranges_of(node) {
                line.push(' ');
                line.push_str(&range.to_string());
            }
        }
        line
    }

    fn cluster_nodes(&self, me: usize) -> String {
        let lines: Vec<String> = self.members().map(|n| self.node_line(n, me)).collect();
        lines.join("\n")
    }

    /// Flattened CLUSTER SLOTS: start, end, then ip/port/id per node.
    fn cluster_slots(&mut self) -> String {
        let hidden = if self.hidden_reads > 0 {
            self.hidden_reads -= 1;
            self.hidden.clone()
        } else {
            Vec::new()
        };

        let mut out = Vec::new();
        for (range, master) in self.runs() {
            if hidden.iter().any(|h| h.overlaps(&range)) {
                continue;
            }
            out.push(range.start.to_string());
            out.push(range.end.to_string());
            let slaves = self
                .members()
                .filter(|&n| self.nodes[n].master == Some(master));
            for node in std::iter::once(master).chain(slaves) {
                out.push(self.nodes[node].host.clone());
                out.push("6379".into());
                out.push(self.nodes[node].id.clone());
            }
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split_matches_cluster_creation() {
        assert_eq!(
            even_split(3),
            vec![
                SlotRange::new(0, 5460),
                SlotRange::new(5461, 10922),
                SlotRange::new(10923, 16383)
            ]
        );
        assert_eq!(even_split(1), vec![SlotRange::new(0, 16383)]);
    }

    #[test]
    fn tokens_skip_tool_flags() {
        let argv: Vec<String> = [
            "redis-cli", "--tls", "--cert", "c", "--key", "k", "--cacert", "ca", "-c", "CLUSTER",
            "SLOTS",
        ]
        .map(String::from)
        .to_vec();
        assert_eq!(command_tokens(&argv), (vec!["CLUSTER".into(), "SLOTS".into()], true));
    }

    #[test]
    fn ids_are_unique() {
        let fake = FakeCluster::new("redis", 3, 2);
        let st = fake.lock();
        let ids: HashSet<&str> = st.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 9);
        assert!(st.nodes.iter().all(|n| n.id.len() == 40));
    }

    #[test]
    fn runs_merge_adjacent_slots() {
        let fake = FakeCluster::new("redis", 2, 0);
        let st = fake.lock();
        let runs = st.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, SlotRange::new(0, 8191));
        assert_eq!(runs[1].0, SlotRange::new(8192, 16383));
    }
}
