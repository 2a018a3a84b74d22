use super::{NodeID, Term};

use serde::{Deserialize, Serialize};

/// A log index. The entry at index 0 is a sentinel, so 0 never refers to a
/// replicated command.
pub type Index = usize;

/// A log entry: a single client write and the term it was proposed in. An
/// entry's position in the log is implicit (entries travel relative to
/// `prev_log_index` on the wire).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// The term in which the entry was proposed.
    pub term: Term,
    /// The key to write.
    pub key: String,
    /// The value to write.
    pub value: String,
    /// The client-supplied request ID, echoed when the entry is applied.
    #[serde(rename = "MID")]
    pub mid: String,
    /// The client that issued the request, and receives the acknowledgement.
    pub src: NodeID,
}

/// The replicated log: an in-memory sequence of entries, along with the
/// current term and vote. Entry terms never decrease along the log, and the
/// current term is at or above the last entry's term.
///
/// Index 0 holds a sentinel entry with term 0, so that the consistency check
/// on the entry preceding a batch is always defined: every replica agrees on
/// the sentinel, which bootstraps replication for empty logs.
///
/// In the steady state the log is append-only. A follower may truncate an
/// uncommitted tail when it conflicts with the leader's log (a different
/// term at the same index), but never at or below the commit index:
/// committed entries are immutable.
pub struct Log {
    /// The entries, starting with the sentinel.
    entries: Vec<Entry>,
    /// The current term.
    term: Term,
    /// Our leader vote in the current term, if any.
    vote: Option<NodeID>,
    /// The index of the last committed entry.
    commit_index: Index,
}

impl Log {
    /// Creates an empty log holding only the sentinel.
    pub fn new(id: NodeID) -> Self {
        let sentinel =
            Entry { term: 0, key: "0".into(), value: "0".into(), mid: "0".into(), src: id };
        Self { entries: vec![sentinel], term: 0, vote: None, commit_index: 0 }
    }

    /// Returns the current term (0 if none) and vote.
    pub fn get_term(&self) -> (Term, Option<&NodeID>) {
        (self.term, self.vote.as_ref())
    }

    /// Sets the current term and cast vote (if any). Enforces that the term
    /// does not regress, and that we only vote for one node in a term.
    pub fn set_term(&mut self, term: Term, vote: Option<NodeID>) {
        assert!(term > 0, "can't set term 0");
        assert!(term >= self.term, "term regression {} → {}", self.term, term);
        assert!(term > self.term || self.vote.is_none() || vote == self.vote, "can't change vote");
        self.term = term;
        self.vote = vote;
    }

    /// Returns the number of entries, including the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the last entry's index and term. The sentinel counts, so an
    /// empty log yields (0, 0).
    pub fn get_last_index(&self) -> (Index, Term) {
        let last = self.entries.last().expect("missing sentinel");
        (self.entries.len() - 1, last.term)
    }

    /// Returns the index of the last committed entry.
    pub fn get_commit_index(&self) -> Index {
        self.commit_index
    }

    /// Fetches the entry at an index, if it exists.
    pub fn get(&self, index: Index) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Checks whether the log contains an entry with the given index and
    /// term. The sentinel makes (0, 0) always true.
    pub fn has(&self, index: Index, term: Term) -> bool {
        self.entries.get(index).map(|e| e.term == term).unwrap_or(false)
    }

    /// Appends a key/value write to the log at the current term, returning
    /// its index.
    pub fn append(&mut self, key: String, value: String, mid: String, src: NodeID) -> Index {
        assert!(self.term > 0, "can't append entry in term 0");
        self.entries.push(Entry { term: self.term, key, value, mid, src, });
        self.entries.len() - 1
    }

    /// Splices a batch of replicated entries into the log following
    /// prev_index, which the caller has already verified via has(). Entries
    /// already present with the same term are left alone; the first term
    /// conflict truncates the local tail and the leader's entries replace
    /// it. Returns the index through which the log now matches the leader's.
    pub fn splice(&mut self, prev_index: Index, entries: Vec<Entry>) -> Index {
        assert!(prev_index < self.entries.len(), "base index {prev_index} not in log");
        if let Some(last) = entries.last() {
            assert!(last.term <= self.term, "splice term {} beyond current {}", last.term, self.term);
        }

        let match_index = prev_index + entries.len();
        for (i, entry) in entries.into_iter().enumerate() {
            let index = prev_index + 1 + i;
            if let Some(existing) = self.entries.get(index) {
                if existing.term == entry.term {
                    debug_assert_eq!(existing, &entry, "entry mismatch at index {index}");
                    continue;
                }
                assert!(index > self.commit_index, "conflict at committed index {index}");
                self.entries.truncate(index);
            }
            debug_assert!(
                entry.term >= self.entries.last().expect("missing sentinel").term,
                "entry term regression at index {index}"
            );
            self.entries.push(entry);
        }
        match_index
    }

    /// Advances the commit index. The index must exist; regressions are
    /// ignored, since commits are monotonic.
    pub fn commit(&mut self, index: Index) -> Index {
        assert!(index < self.entries.len(), "commit index {index} does not exist");
        if index > self.commit_index {
            self.commit_index = index;
        }
        self.commit_index
    }

    /// Returns a copy of up to max entries starting at from, for
    /// replication batches.
    pub fn scan(&self, from: Index, max: usize) -> Vec<Entry> {
        let from = from.min(self.entries.len());
        let to = (from + max).min(self.entries.len());
        self.entries[from..to].to_vec()
    }
}
