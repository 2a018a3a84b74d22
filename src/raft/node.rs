use super::log::{Index, Log};
use super::message::{Envelope, Message, BROADCAST};
use super::state::State;
use crate::error::Result;

use itertools::Itertools as _;
use log::{debug, info};
use rand::Rng as _;
use std::collections::{HashMap, HashSet};

/// A node ID. Replica and client IDs are opaque strings assigned by the
/// simulator, e.g. "0000" or "1AF3".
pub type NodeID = String;

/// A leader term.
pub type Term = u64;

/// A logical clock interval as number of ticks.
pub type Ticks = u8;

/// Raft node options.
pub struct Options {
    /// The number of ticks between leader heartbeats.
    pub heartbeat_interval: Ticks,
    /// The range of randomized election timeouts for followers and candidates.
    pub election_timeout_range: std::ops::Range<Ticks>,
    /// Maximum number of entries to send in a single append_entries message.
    pub max_append_entries: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            heartbeat_interval: super::HEARTBEAT_INTERVAL,
            election_timeout_range: super::ELECTION_TIMEOUT_RANGE,
            max_append_entries: super::MAX_APPEND_ENTRIES,
        }
    }
}

/// A Raft node, with a dynamic role. The node is driven synchronously by
/// processing inbound messages via step() or by advancing time via tick().
/// These methods consume the current node, and return a new one with a
/// possibly different role. Outbound messages are sent via the given
/// node_tx channel, and the driver forwards them to the broker.
///
/// This enum wraps the RawNode<Role> types, which implement the actual
/// node logic. It exists for ergonomic use across role transitions, i.e
/// node = node.step()?.
pub enum Node {
    Candidate(RawNode<Candidate>),
    Follower(RawNode<Follower>),
    Leader(RawNode<Leader>),
}

impl Node {
    /// Creates a new Raft node, starting as a leaderless follower, or
    /// leader if there are no peers.
    pub fn new(
        id: NodeID,
        peers: HashSet<NodeID>,
        log: Log,
        state: Box<dyn State>,
        node_tx: crossbeam::channel::Sender<Envelope>,
        opts: Options,
    ) -> Result<Self> {
        let node = RawNode::new(id, peers, log, state, node_tx, opts);
        if node.peers.is_empty() {
            // If there are no peers, become leader immediately.
            return Ok(node.into_candidate()?.into_leader()?.into());
        }
        Ok(node.into())
    }

    /// Returns the node ID.
    pub fn id(&self) -> &NodeID {
        match self {
            Node::Candidate(n) => &n.id,
            Node::Follower(n) => &n.id,
            Node::Leader(n) => &n.id,
        }
    }

    /// Returns the node term.
    pub fn term(&self) -> Term {
        match self {
            Node::Candidate(n) => n.term(),
            Node::Follower(n) => n.term(),
            Node::Leader(n) => n.term(),
        }
    }

    /// Processes an inbound message.
    pub fn step(self, msg: Envelope) -> Result<Self> {
        debug!("Stepping {msg:?}");
        match self {
            Node::Candidate(n) => n.step(msg),
            Node::Follower(n) => n.step(msg),
            Node::Leader(n) => n.step(msg),
        }
    }

    /// Moves time forward by a tick.
    pub fn tick(self) -> Result<Self> {
        match self {
            Node::Candidate(n) => n.tick(),
            Node::Follower(n) => n.tick(),
            Node::Leader(n) => n.tick(),
        }
    }
}

impl From<RawNode<Candidate>> for Node {
    fn from(n: RawNode<Candidate>) -> Self {
        Node::Candidate(n)
    }
}

impl From<RawNode<Follower>> for Node {
    fn from(n: RawNode<Follower>) -> Self {
        Node::Follower(n)
    }
}

impl From<RawNode<Leader>> for Node {
    fn from(n: RawNode<Leader>) -> Self {
        Node::Leader(n)
    }
}

/// A Raft role: leader, follower, or candidate.
pub trait Role {
    /// The leader this role currently believes in, if any, given the
    /// node's own ID. Stamped on outbound envelopes so clients know where
    /// to send requests.
    fn leader<'a>(&'a self, id: &'a NodeID) -> Option<&'a NodeID>;
}

/// A Raft node with the concrete role R.
///
/// This implements the typestate pattern, where individual node states
/// (roles) are encoded as RawNode<Role>. Leader-only and candidate-only
/// state can't be accessed from the wrong role.
pub struct RawNode<R: Role = Follower> {
    id: NodeID,
    peers: HashSet<NodeID>,
    log: Log,
    state: Box<dyn State>,
    node_tx: crossbeam::channel::Sender<Envelope>,
    opts: Options,
    role: R,
}

impl<R: Role> RawNode<R> {
    /// Helper for role transitions.
    fn into_role<T: Role>(self, role: T) -> RawNode<T> {
        RawNode {
            id: self.id,
            peers: self.peers,
            log: self.log,
            state: self.state,
            node_tx: self.node_tx,
            opts: self.opts,
            role,
        }
    }

    /// Returns the node's current term. Convenience wrapper for Log.get_term().
    fn term(&self) -> Term {
        self.log.get_term().0
    }

    /// Returns the cluster size as number of nodes.
    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Returns the cluster quorum size (strict majority).
    fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Returns the quorum value of the given unsorted vector, in descending
    /// order. The slice must have the same size as the cluster.
    fn quorum_value<T: Ord + Copy>(&self, mut values: Vec<T>) -> T {
        assert_eq!(values.len(), self.cluster_size(), "vector size must match cluster size");
        *values.select_nth_unstable_by(self.quorum_size() - 1, |a, b: &T| a.cmp(b).reverse()).1
    }

    /// Sends a message, stamping the envelope with the believed leader.
    fn send(&self, to: &NodeID, message: Message) -> Result<()> {
        let leader =
            self.role.leader(&self.id).cloned().unwrap_or_else(|| BROADCAST.to_string());
        let msg = Envelope { src: self.id.clone(), dst: to.clone(), leader, message };
        debug!("Sending {msg:?}");
        Ok(self.node_tx.send(msg)?)
    }

    /// Broadcasts a message to all peers individually.
    fn broadcast(&self, message: Message) -> Result<()> {
        // Sort for test determinism.
        for id in self.peers.iter().cloned().sorted() {
            self.send(&id, message.clone())?;
        }
        Ok(())
    }

    /// Generates a randomized election timeout.
    fn gen_election_timeout(&self) -> Ticks {
        rand::thread_rng().gen_range(self.opts.election_timeout_range.clone())
    }

    /// Checks whether an inbound message should be dispatched at all.
    /// Datagrams for other recipients and protocol messages from nodes
    /// outside the cluster are dropped: the channel is best-effort and
    /// shared with arbitrary clients. Protocol messages always carry a
    /// term of at least 1 (the first campaign moves to term 1), so a zero
    /// term is garbage too.
    fn accept(&self, msg: &Envelope) -> bool {
        if msg.dst != self.id && msg.dst != BROADCAST {
            return false;
        }
        match msg.message.term() {
            Some(term) => term > 0 && self.peers.contains(&msg.src),
            None => true,
        }
    }

    /// Answers a protocol message from a past term. Requests are rejected
    /// with our current term so the sender can step down; responses are
    /// dropped.
    fn reply_stale(&self, msg: Envelope) -> Result<()> {
        let term = self.term();
        match msg.message {
            Message::RequestVote { .. } => {
                self.send(&msg.src, Message::RequestVoteResponse { term, vote: false })
            }
            Message::AppendEntries { .. } => self.send(
                &msg.src,
                Message::AppendEntriesResponse { term, success: false, match_index: 0 },
            ),
            message => {
                debug!("Dropping stale {message:?} from {}", msg.src);
                Ok(())
            }
        }
    }

    /// Transitions into a follower in the given term, following the given
    /// leader if any. Dispatching a message from a new term passes the
    /// sender along as the believed leader, which points redirected
    /// clients somewhere fresher than a stale hint.
    fn into_follower(mut self, term: Term, leader: Option<NodeID>) -> Result<RawNode<Follower>> {
        assert!(term >= self.term(), "term regression {} → {}", self.term(), term);
        if term > self.term() {
            info!("Discovered new term {term}");
            self.log.set_term(term, None);
        }
        if let Some(leader) = &leader {
            info!("Following leader {leader} in term {term}");
        }
        let election_timeout = self.gen_election_timeout();
        Ok(self.into_role(Follower::new(leader, election_timeout)))
    }

    /// Answers a client get from the local key/value map when the key is
    /// present (a possibly stale read), otherwise points the client at the
    /// leader. A miss on the leader itself fails the request, since a
    /// self-redirect would bounce the client forever.
    fn respond_read(&self, client: &NodeID, key: &str, mid: String) -> Result<()> {
        if let Some(value) = self.state.read(key) {
            return self.send(client, Message::Ok { mid, value: Some(value) });
        }
        match self.role.leader(&self.id) {
            Some(leader) if leader != &self.id => self.send(client, Message::Redirect { mid }),
            _ => self.send(client, Message::Fail { mid }),
        }
    }

    /// Redirects a client write to the believed leader, or fails it when
    /// no leader is known and the client must back off and retry.
    fn respond_redirect(&self, client: &NodeID, mid: String) -> Result<()> {
        match self.role.leader(&self.id) {
            Some(_) => self.send(client, Message::Redirect { mid }),
            None => self.send(client, Message::Fail { mid }),
        }
    }

    /// Applies any committed but unapplied entries to the state machine,
    /// in log order.
    fn maybe_apply(&mut self) -> Result<()> {
        while self.state.applied_index() < self.log.get_commit_index() {
            let index = self.state.applied_index() + 1;
            let entry = self.log.get(index).expect("missing committed entry").clone();
            debug!("Applying {entry:?} at index {index}");
            self.state.apply(index, &entry);
        }
        Ok(())
    }
}

// A follower replicates state from a leader.
pub struct Follower {
    /// The leader, or None if just initialized or between elections.
    leader: Option<NodeID>,
    /// Ticks since the election timer was last reset.
    election_elapsed: Ticks,
    /// The election timeout before campaigning.
    election_timeout: Ticks,
}

impl Follower {
    /// Creates a new follower role.
    fn new(leader: Option<NodeID>, election_timeout: Ticks) -> Self {
        Self { leader, election_elapsed: 0, election_timeout }
    }
}

impl Role for Follower {
    fn leader<'a>(&'a self, _id: &'a NodeID) -> Option<&'a NodeID> {
        self.leader.as_ref()
    }
}

impl RawNode<Follower> {
    /// Creates a new node as a leaderless follower.
    fn new(
        id: NodeID,
        peers: HashSet<NodeID>,
        log: Log,
        state: Box<dyn State>,
        node_tx: crossbeam::channel::Sender<Envelope>,
        opts: Options,
    ) -> Self {
        let role = Follower::new(None, 0);
        let mut node = Self { id, peers, log, state, node_tx, opts, role };
        node.role.election_timeout = node.gen_election_timeout();
        node
    }

    /// Transitions the follower into a candidate, campaigning for
    /// leadership in a new term.
    fn into_candidate(self) -> Result<RawNode<Candidate>> {
        let election_timeout = self.gen_election_timeout();
        let mut node = self.into_role(Candidate::new(election_timeout));
        node.campaign()?;
        Ok(node)
    }

    /// Processes a message.
    fn step(mut self, msg: Envelope) -> Result<Node> {
        if !self.accept(&msg) {
            debug!("Dropping {msg:?}");
            return Ok(self.into());
        }

        // A message from a future term moves us into it; reprocess the
        // message there. A message from a past term is answered with our
        // term so the sender can step down.
        if let Some(term) = msg.message.term() {
            if term > self.term() {
                return self.into_follower(term, Some(msg.src.clone()))?.step(msg);
            }
            if term < self.term() {
                self.reply_stale(msg)?;
                return Ok(self.into());
            }
        }

        match msg.message {
            // Replicas announce themselves to the broker, not to us.
            Message::Hello => {}

            // A candidate in this term requests our vote.
            Message::RequestVote { last_log_index, last_log_term, .. } => {
                // Don't vote if we already voted for someone else in this term.
                if let (_, Some(vote)) = self.log.get_term() {
                    if vote != &msg.src {
                        self.send(
                            &msg.src,
                            Message::RequestVoteResponse { term: self.term(), vote: false },
                        )?;
                        return Ok(self.into());
                    }
                }

                // Don't vote if our log is more up-to-date than the candidate's.
                let (log_index, log_term) = self.log.get_last_index();
                if log_term > last_log_term
                    || (log_term == last_log_term && log_index > last_log_index)
                {
                    self.send(
                        &msg.src,
                        Message::RequestVoteResponse { term: self.term(), vote: false },
                    )?;
                    return Ok(self.into());
                }

                // Grant the vote.
                info!("Voting for {} in term {} election", msg.src, self.term());
                self.log.set_term(self.term(), Some(msg.src.clone()));
                self.role.election_elapsed = 0;
                self.send(&msg.src, Message::RequestVoteResponse { term: self.term(), vote: true })?;
            }

            // We may receive a vote after we lost an election and followed
            // a different leader. Ignore it.
            Message::RequestVoteResponse { .. } => {}

            // The leader replicates entries to us, or probes our log with
            // an empty batch.
            Message::AppendEntries { prev_log_index, prev_log_term, entries, leader_commit, .. } => {
                // Valid-term leader contact: reset the election timer and
                // track the leader.
                self.role.election_elapsed = 0;
                if self.role.leader.as_ref() != Some(&msg.src) {
                    info!("Following leader {} in term {}", msg.src, self.term());
                    self.role.leader = Some(msg.src.clone());
                }

                // The entry preceding the batch must match our log;
                // otherwise the leader probes one entry earlier.
                if !self.log.has(prev_log_index, prev_log_term) {
                    self.send(
                        &msg.src,
                        Message::AppendEntriesResponse {
                            term: self.term(),
                            success: false,
                            match_index: 0,
                        },
                    )?;
                    return Ok(self.into());
                }

                let heartbeat = entries.is_empty();
                let match_index = self.log.splice(prev_log_index, entries);

                // Advance the commit index and apply entries. The logs
                // are verified identical through match_index only; the
                // leader's commit index may cover entries we don't have
                // yet, so clamp to the verified prefix.
                self.log.commit(leader_commit.min(match_index));
                self.maybe_apply()?;

                // Heartbeats carry nothing the leader's commit arithmetic
                // needs, so don't acknowledge them; acknowledging would
                // multiply background traffic by the cluster size.
                if !heartbeat {
                    self.send(
                        &msg.src,
                        Message::AppendEntriesResponse {
                            term: self.term(),
                            success: true,
                            match_index,
                        },
                    )?;
                }
            }

            // A deposed leader's stragglers. Ignore them.
            Message::AppendEntriesResponse { .. } => {}

            // Writes go to the leader; point the client there.
            Message::Put { mid, .. } => self.respond_redirect(&msg.src, mid)?,

            // Reads are served from the local map when possible.
            Message::Get { key, mid } => self.respond_read(&msg.src, &key, mid)?,

            // Client replies are never addressed to replicas.
            Message::Ok { .. } | Message::Redirect { .. } | Message::Fail { .. } => {}
        }
        Ok(self.into())
    }

    /// Processes a logical clock tick.
    fn tick(mut self) -> Result<Node> {
        self.role.election_elapsed += 1;
        if self.role.election_elapsed >= self.role.election_timeout {
            return Ok(self.into_candidate()?.into());
        }
        Ok(self.into())
    }
}

/// A candidate is campaigning to become a leader.
pub struct Candidate {
    /// Votes received (including ourself).
    votes: HashSet<NodeID>,
    /// Ticks since the election started.
    election_elapsed: Ticks,
    /// Election timeout before starting a new election.
    election_timeout: Ticks,
}

impl Candidate {
    /// Creates a new candidate role.
    fn new(election_timeout: Ticks) -> Self {
        Self { votes: HashSet::new(), election_elapsed: 0, election_timeout }
    }
}

impl Role for Candidate {
    fn leader<'a>(&'a self, _id: &'a NodeID) -> Option<&'a NodeID> {
        None
    }
}

impl RawNode<Candidate> {
    /// Campaigns for leadership by increasing the term, voting for
    /// ourself, and soliciting votes from all peers.
    fn campaign(&mut self) -> Result<()> {
        let term = self.term() + 1;
        info!("Starting new election for term {term}");
        self.role = Candidate::new(self.gen_election_timeout());
        self.role.votes.insert(self.id.clone()); // vote for ourself
        self.log.set_term(term, Some(self.id.clone()));

        let (last_log_index, last_log_term) = self.log.get_last_index();
        self.broadcast(Message::RequestVote { term, last_log_index, last_log_term })
    }

    /// Transitions the candidate to a leader. We won the election.
    fn into_leader(self) -> Result<RawNode<Leader>> {
        info!("Won election for term {}, becoming leader", self.term());
        let (last_index, _) = self.log.get_last_index();
        let peers = self.peers.clone();
        let mut node = self.into_role(Leader::new(peers, last_index + 1));

        // Announce leadership immediately, and commit anything a sole
        // node can commit by itself.
        node.heartbeat()?;
        node.maybe_commit_and_apply()?;
        Ok(node)
    }

    /// Processes a message.
    fn step(mut self, msg: Envelope) -> Result<Node> {
        if !self.accept(&msg) {
            debug!("Dropping {msg:?}");
            return Ok(self.into());
        }

        if let Some(term) = msg.message.term() {
            if term > self.term() {
                return self.into_follower(term, Some(msg.src.clone()))?.step(msg);
            }
            if term < self.term() {
                self.reply_stale(msg)?;
                return Ok(self.into());
            }
        }

        match msg.message {
            Message::Hello => {}

            // Don't grant votes for other candidates who also campaign.
            Message::RequestVote { .. } => {
                self.send(&msg.src, Message::RequestVoteResponse { term: self.term(), vote: false })?
            }

            // If we received a vote, record it. If the votes give us
            // quorum, assume leadership.
            Message::RequestVoteResponse { vote: true, .. } => {
                self.role.votes.insert(msg.src.clone());
                if self.role.votes.len() >= self.quorum_size() {
                    return Ok(self.into_leader()?.into());
                }
            }

            // We didn't get a vote. :(
            Message::RequestVoteResponse { vote: false, .. } => {}

            // A leader won this term's election. Follow it and reprocess
            // the message there.
            Message::AppendEntries { .. } => {
                let term = self.term();
                return self.into_follower(term, Some(msg.src.clone()))?.step(msg);
            }

            // We weren't the leader in this term.
            Message::AppendEntriesResponse { .. } => {}

            // We don't know of a leader while campaigning; clients must
            // back off and retry.
            Message::Put { mid, .. } => self.respond_redirect(&msg.src, mid)?,

            Message::Get { key, mid } => self.respond_read(&msg.src, &key, mid)?,

            Message::Ok { .. } | Message::Redirect { .. } | Message::Fail { .. } => {}
        }
        Ok(self.into())
    }

    /// Processes a logical clock tick.
    fn tick(mut self) -> Result<Node> {
        self.role.election_elapsed += 1;
        if self.role.election_elapsed >= self.role.election_timeout {
            // The election failed to reach quorum (e.g. a split vote).
            // Start another one; randomized timeouts make this converge.
            self.campaign()?;
        }
        Ok(self.into())
    }
}

/// Follower replication progress, tracked by the leader.
struct Progress {
    /// The next log index to send to the follower.
    next_index: Index,
    /// The highest log index known to be replicated on the follower.
    match_index: Index,
}

impl Progress {
    /// Attempts to advance the follower's match index, returning true if
    /// it did. next_index follows, but never regresses here: stale
    /// responses must not rewind in-flight replication.
    fn advance(&mut self, match_index: Index) -> bool {
        if match_index <= self.match_index {
            return false;
        }
        self.match_index = match_index;
        self.next_index = self.next_index.max(match_index + 1);
        true
    }

    /// Moves next_index back one entry after a rejected batch, probing for
    /// the point where the logs agree. Bounded below by match_index + 1;
    /// the sentinel at index 0 guarantees the probe terminates.
    fn retreat(&mut self) {
        self.next_index = self.next_index.saturating_sub(1).max(self.match_index + 1);
    }
}

// A leader serves requests and replicates the log to followers.
pub struct Leader {
    /// Follower replication progress.
    progress: HashMap<NodeID, Progress>,
    /// Number of ticks since the last heartbeat broadcast.
    since_heartbeat: Ticks,
}

impl Leader {
    /// Creates a new leader role, with next_index for every peer starting
    /// at the end of the log.
    fn new(peers: HashSet<NodeID>, next_index: Index) -> Self {
        let progress =
            peers.into_iter().map(|p| (p, Progress { next_index, match_index: 0 })).collect();
        Self { progress, since_heartbeat: 0 }
    }
}

impl Role for Leader {
    fn leader<'a>(&'a self, id: &'a NodeID) -> Option<&'a NodeID> {
        Some(id)
    }
}

impl RawNode<Leader> {
    /// Processes a message.
    fn step(mut self, msg: Envelope) -> Result<Node> {
        if !self.accept(&msg) {
            debug!("Dropping {msg:?}");
            return Ok(self.into());
        }

        if let Some(term) = msg.message.term() {
            if term > self.term() {
                return self.into_follower(term, Some(msg.src.clone()))?.step(msg);
            }
            if term < self.term() {
                self.reply_stale(msg)?;
                return Ok(self.into());
            }
        }

        match msg.message {
            Message::Hello => {}

            // Don't grant other votes in this term.
            Message::RequestVote { .. } => {
                self.send(&msg.src, Message::RequestVoteResponse { term: self.term(), vote: false })?
            }

            // Votes can come in after we won the election. Ignore them.
            Message::RequestVoteResponse { .. } => {}

            // There can't be two leaders in the same term.
            Message::AppendEntries { .. } => {
                panic!("saw other leader {} in term {}", msg.src, self.term())
            }

            // A follower appended our entries. Record its progress,
            // attempt to commit, and keep catching it up (batches are
            // capped, so a lagging follower drains over multiple rounds).
            Message::AppendEntriesResponse { success: true, match_index, .. } => {
                let (last_index, _) = self.log.get_last_index();
                assert!(match_index <= last_index, "follower matched unknown index {match_index}");

                if self.progress_mut(&msg.src).advance(match_index) {
                    self.maybe_commit_and_apply()?;
                }
                self.maybe_send_append(&msg.src)?;
            }

            // The follower rejected the batch base. Probe one entry
            // earlier and resend; the sentinel guarantees convergence.
            Message::AppendEntriesResponse { success: false, .. } => {
                self.progress_mut(&msg.src).retreat();
                self.send_append(&msg.src, false)?;
                self.maybe_commit_and_apply()?;
            }

            // A client write: propose it. The client is answered once the
            // entry commits and applies.
            Message::Put { key, value, mid } => {
                let index = self.propose(key, value, mid, msg.src.clone())?;
                debug!("Appended client write from {} at index {index}", msg.src);
                if self.peers.is_empty() {
                    self.maybe_commit_and_apply()?;
                }
            }

            Message::Get { key, mid } => self.respond_read(&msg.src, &key, mid)?,

            Message::Ok { .. } | Message::Redirect { .. } | Message::Fail { .. } => {}
        }
        Ok(self.into())
    }

    /// Processes a logical clock tick.
    fn tick(mut self) -> Result<Node> {
        self.role.since_heartbeat += 1;
        if self.role.since_heartbeat >= self.opts.heartbeat_interval {
            self.heartbeat()?;
        }
        Ok(self.into())
    }

    /// Broadcasts an empty append_entries to every peer, suppressing
    /// elections and carrying the commit index. Resets the heartbeat timer.
    fn heartbeat(&mut self) -> Result<()> {
        for peer in self.peers.iter().cloned().sorted() {
            self.send_append(&peer, true)?;
        }
        self.role.since_heartbeat = 0;
        Ok(())
    }

    /// Returns a mutable borrow of a peer's progress.
    fn progress_mut(&mut self, id: &NodeID) -> &mut Progress {
        self.role.progress.get_mut(id).expect("unknown node")
    }

    /// Proposes a client write by appending it to our log and sending it
    /// to every peer whose replication progress covers the new entry.
    fn propose(&mut self, key: String, value: String, mid: String, client: NodeID) -> Result<Index> {
        let index = self.log.append(key, value, mid, client);
        for peer in self.peers.iter().cloned().sorted() {
            if index >= self.role.progress[&peer].next_index {
                self.send_append(&peer, false)?;
            }
        }
        Ok(index)
    }

    /// Sends pending log entries to a peer if it has any, according to its
    /// next_index.
    fn maybe_send_append(&self, peer: &NodeID) -> Result<()> {
        let (last_index, _) = self.log.get_last_index();
        if self.role.progress[peer].next_index <= last_index {
            self.send_append(peer, false)?;
        }
        Ok(())
    }

    /// Sends a batch of entries to a peer, starting at its next_index and
    /// based on the entry before it. A heartbeat sends the empty batch
    /// with the same base, probing the peer's log without payload.
    fn send_append(&self, peer: &NodeID, heartbeat: bool) -> Result<()> {
        let progress = &self.role.progress[peer];
        assert_ne!(progress.next_index, 0, "invalid next_index 0 for {peer}");
        let prev_log_index = progress.next_index - 1;
        let prev_log_term = self.log.get(prev_log_index).expect("missing base entry").term;
        let entries = if heartbeat {
            Vec::new()
        } else {
            self.log.scan(progress.next_index, self.opts.max_append_entries)
        };
        debug!("Replicating {} entries with base {prev_log_index} to {peer}", entries.len());
        self.send(
            peer,
            Message::AppendEntries {
                term: self.term(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.log.get_commit_index(),
            },
        )
    }

    /// Commits any new entries that have been replicated to a quorum,
    /// applies them to the state machine, and acknowledges each applied
    /// write to the client that proposed it.
    fn maybe_commit_and_apply(&mut self) -> Result<()> {
        let (last_index, _) = self.log.get_last_index();
        let quorum_index = self.quorum_value(
            self.role
                .progress
                .values()
                .map(|p| p.match_index)
                .chain(std::iter::once(last_index))
                .collect(),
        );
        if quorum_index <= self.log.get_commit_index() {
            return Ok(());
        }

        // NB: this advances the commit index by quorum count alone, also
        // across entries from previous terms. Figure 8 in the Raft paper
        // shows how counting replicas can overwrite an entry committed by
        // a prior leader; the paper's fix only commits entries from the
        // leader's own term. This protocol has no noop entries to carry a
        // current-term commit, and keeps the counting rule.
        self.log.commit(quorum_index);

        while self.state.applied_index() < self.log.get_commit_index() {
            let index = self.state.applied_index() + 1;
            let entry = self.log.get(index).expect("missing committed entry").clone();
            debug!("Applying {entry:?} at index {index}");
            self.state.apply(index, &entry);
            // The write is now durable in the replicated log; acknowledge
            // it. Sent once per committed appearance: a client that
            // retried the same MID gets one reply per commit.
            self.send(&entry.src, Message::Ok { mid: entry.mid, value: None })?;
        }
        Ok(())
    }
}
