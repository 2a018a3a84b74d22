use super::{Entry, Index, NodeID, Term};

use serde::{Deserialize, Serialize};

/// The broadcast address. Used as `dst` to address all replicas, and as a
/// `leader` hint when no leader is known.
pub const BROADCAST: &str = "FFFF";

/// A message envelope, as exchanged with the broker. Every datagram on the
/// wire is a JSON-encoded envelope. The `leader` field carries the sender's
/// believed leader, so clients know where to retry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sender ID.
    pub src: NodeID,
    /// The recipient ID, or BROADCAST for all replicas.
    pub dst: NodeID,
    /// The sender's believed leader, or BROADCAST if unknown.
    pub leader: NodeID,
    /// The message payload, tagged by `type` on the wire.
    #[serde(flatten)]
    pub message: Message,
}

/// A message payload. Protocol messages (between replicas) carry the
/// sender's term; client messages don't.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Broadcast once at startup, so the broker can register the sender's
    /// ephemeral endpoint. Carries no payload.
    Hello,

    /// Candidates solicit votes from all peers when campaigning.
    RequestVote {
        /// The candidate's current term.
        term: Term,
        /// The index of the candidate's last log entry.
        last_log_index: Index,
        /// The term of the candidate's last log entry.
        last_log_term: Term,
    },

    /// A voter answers every RequestVote, granting at most one vote per term.
    RequestVoteResponse {
        /// The voter's current term.
        term: Term,
        /// Whether the vote was granted.
        vote: bool,
    },

    /// Leaders replicate log entries to followers, and probe their logs with
    /// empty batches (heartbeats).
    AppendEntries {
        /// The leader's current term.
        term: Term,
        /// The index of the entry immediately preceding the batch.
        prev_log_index: Index,
        /// The term of the entry immediately preceding the batch.
        prev_log_term: Term,
        /// The entries to replicate. Empty for heartbeats.
        entries: Vec<Entry>,
        /// The leader's commit index.
        leader_commit: Index,
    },

    /// Followers accept or reject a batch of entries. Heartbeats are not
    /// acknowledged.
    AppendEntriesResponse {
        /// The follower's current term.
        term: Term,
        /// Whether the batch was appended.
        success: bool,
        /// The index through which the follower's log matches the leader's,
        /// or 0 on rejection.
        match_index: Index,
    },

    /// A client asks to write a key/value pair.
    Put {
        key: String,
        value: String,
        /// The client-supplied request ID, echoed in the reply.
        #[serde(rename = "MID")]
        mid: String,
    },

    /// A client asks to read a key.
    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },

    /// A successful client reply. Carries the value for gets.
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    /// Tells the client to retry against the envelope's leader.
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// Tells the client the request can't be served; it should back off and
    /// retry.
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },
}

impl Message {
    /// Returns the sender's term for protocol messages, or None for client
    /// traffic.
    pub fn term(&self) -> Option<Term> {
        match self {
            Message::RequestVote { term, .. }
            | Message::RequestVoteResponse { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendEntriesResponse { term, .. } => Some(*term),
            Message::Hello
            | Message::Put { .. }
            | Message::Get { .. }
            | Message::Ok { .. }
            | Message::Redirect { .. }
            | Message::Fail { .. } => None,
        }
    }
}
