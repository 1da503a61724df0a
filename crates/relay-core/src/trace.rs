use crate::error::{ErrorKind, RelayError};
use crate::types::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ItemStatus
// ---------------------------------------------------------------------------

/// Lifecycle of one work item.
///
/// An item is `Executing` while its handlers run and ends `Completed` or
/// `Aborted`. Terminal states are never left; an item is never executed
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Executing,
    Completed,
    Aborted,
}

// ---------------------------------------------------------------------------
// TraceEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Zero-based position in the transaction's execution order.
    pub seq: usize,
    pub item: WorkItem,
    /// Number of handlers that ran. `0` means the target had no matching
    /// handler and the delivery was a no-op.
    pub handlers_run: usize,
    /// Work items this execution appended to the queue.
    pub spawned: usize,
    pub console: String,
    pub status: ItemStatus,
}

// ---------------------------------------------------------------------------
// ExecutionTrace
// ---------------------------------------------------------------------------

/// Ordered record of every work item executed by a successful transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub transaction_id: Uuid,
    pub block_time: DateTime<Utc>,
    pub entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry's console output concatenated in execution order.
    pub fn console(&self) -> String {
        concat_console(&self.entries)
    }

    /// Whitespace-separated tokens of [`console`](Self::console).
    pub fn markers(&self) -> Vec<String> {
        markers_of(&self.entries)
    }

    /// `Display` form of each executed item, in order.
    pub fn items(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.item.to_string()).collect()
    }
}

fn concat_console(entries: &[TraceEntry]) -> String {
    entries.iter().map(|e| e.console.as_str()).collect()
}

fn markers_of(entries: &[TraceEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|e| e.console.split_whitespace())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// TransactionFailure
// ---------------------------------------------------------------------------

/// Report for a transaction that aborted.
///
/// `failed` is the first work item that returned an error; `completed` holds
/// the entries that finished before it. None of the transaction's table
/// writes survive.
#[derive(Debug, Error)]
#[error("transaction {transaction_id} failed at work item #{} ({}): {error}", .failed.seq, .failed.item)]
pub struct TransactionFailure {
    pub transaction_id: Uuid,
    pub failed: TraceEntry,
    pub error: RelayError,
    pub completed: Vec<TraceEntry>,
}

impl TransactionFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Markers printed by completed items, followed by whatever the failing
    /// item printed before it aborted.
    pub fn markers(&self) -> Vec<String> {
        let mut markers = markers_of(&self.completed);
        markers.extend(self.failed.console.split_whitespace().map(str::to_string));
        markers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionInvocation;

    fn entry(seq: usize, action: &str, console: &str) -> TraceEntry {
        TraceEntry {
            seq,
            item: ActionInvocation::new("receiver", action).unwrap().into(),
            handlers_run: 1,
            spawned: 0,
            console: console.to_string(),
            status: ItemStatus::Completed,
        }
    }

    #[test]
    fn console_and_markers_follow_entry_order() {
        let trace = ExecutionTrace {
            transaction_id: Uuid::new_v4(),
            block_time: DateTime::<Utc>::default(),
            entries: vec![entry(0, "receive1", " 7 "), entry(1, "receive2", ""), entry(2, "receive3", " 8  9 ")],
        };
        assert_eq!(trace.console(), " 7  8  9 ");
        assert_eq!(trace.markers(), vec!["7", "8", "9"]);
        assert_eq!(trace.items()[1], "receiver::receive2");
        assert_eq!(trace.len(), 3);
    }

    #[test]
    fn failure_reports_kind_and_position() {
        let mut failed = entry(1, "receive2", " 8 ");
        failed.status = ItemStatus::Aborted;
        let failure = TransactionFailure {
            transaction_id: Uuid::nil(),
            failed,
            error: RelayError::AuthorizationFailure {
                actor: "alice".into(),
                permission: None,
            },
            completed: vec![entry(0, "receive1", " 7 ")],
        };
        assert_eq!(failure.kind(), ErrorKind::AuthorizationFailure);
        assert_eq!(failure.markers(), vec!["7", "8"]);
        let msg = failure.to_string();
        assert!(msg.contains("#1"), "{msg}");
        assert!(msg.contains("receiver::receive2"), "{msg}");
        assert!(msg.contains("missing authority of alice"), "{msg}");
    }
}
