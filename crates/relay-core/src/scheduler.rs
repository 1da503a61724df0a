//! The dispatch loop.
//!
//! A transaction owns one [`DispatchQueue`], seeded with its root action.
//! The [`Scheduler`] pops the head, runs every handler resolved for it, and
//! on success appends the sends and notifications it produced to the tail.
//! Work produced by item *k* therefore runs after everything that was
//! already queued when *k* started, at any nesting depth. The first handler
//! error stops the loop and fails the transaction.

use crate::registry::{Handler, Registry};
use crate::runtime::{ApplyContext, Environment};
use crate::table::TableStore;
use crate::trace::{ExecutionTrace, ItemStatus, TraceEntry, TransactionFailure};
use crate::types::{ActionInvocation, WorkItem};
use std::collections::VecDeque;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DispatchQueue
// ---------------------------------------------------------------------------

/// Single FIFO of pending work for one transaction.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    items: VecDeque<WorkItem>,
    enqueued: usize,
}

impl DispatchQueue {
    pub fn seeded(root: ActionInvocation) -> Self {
        let mut queue = Self::default();
        queue.push(WorkItem::Action(root));
        queue
    }

    pub fn push(&mut self, item: WorkItem) {
        self.enqueued += 1;
        self.items.push_back(item);
    }

    /// Append in iteration order.
    pub fn extend(&mut self, items: impl IntoIterator<Item = WorkItem>) {
        for item in items {
            self.push(item);
        }
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ever pushed, including those already popped.
    pub fn total_enqueued(&self) -> usize {
        self.enqueued
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler<'a> {
    registry: &'a Registry,
    env: &'a Environment<'a>,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a Registry, env: &'a Environment<'a>) -> Self {
        Self { registry, env }
    }

    /// Handlers for `item`, in execution order.
    pub fn resolve(&self, item: &WorkItem) -> Vec<Handler> {
        match item {
            WorkItem::Action(a) => self
                .registry
                .lookup_action(&a.contract, &a.action)
                .into_iter()
                .collect(),
            WorkItem::Notification(n) => self.registry.lookup_notification_handlers(
                &n.recipient,
                &n.origin_contract,
                &n.origin_action,
            ),
        }
    }

    /// Drain the queue seeded with `root`, writing tables into `store`.
    ///
    /// On failure `store` may hold partial writes; the caller decides whether
    /// to keep it.
    pub fn run(
        &self,
        root: ActionInvocation,
        store: &mut TableStore,
    ) -> Result<ExecutionTrace, TransactionFailure> {
        let transaction_id = Uuid::new_v4();
        let mut queue = DispatchQueue::seeded(root);
        let mut entries: Vec<TraceEntry> = Vec::new();

        while let Some(item) = queue.pop() {
            let seq = entries.len();
            let handlers = self.resolve(&item);
            tracing::debug!(
                transaction = %transaction_id,
                seq,
                item = %item,
                handlers = handlers.len(),
                queued = queue.len(),
                "start work item"
            );

            let mut ctx = ApplyContext::new(&item, store, self.env);
            let outcome = handlers.iter().try_for_each(|handler| handler(&mut ctx));
            let effects = ctx.finish();

            let mut entry = TraceEntry {
                seq,
                item,
                handlers_run: handlers.len(),
                spawned: 0,
                console: effects.console,
                status: ItemStatus::Executing,
            };

            match outcome {
                Ok(()) => {
                    entry.spawned = effects.pending.len();
                    entry.status = ItemStatus::Completed;
                    if self.env.config.dispatch.echo_console && !entry.console.is_empty() {
                        tracing::info!(seq, item = %entry.item, console = %entry.console, "console");
                    }
                    queue.extend(effects.pending);
                    entries.push(entry);
                }
                Err(error) => {
                    entry.status = ItemStatus::Aborted;
                    tracing::warn!(
                        transaction = %transaction_id,
                        seq,
                        item = %entry.item,
                        error = %error,
                        discarded = effects.pending.len(),
                        "work item aborted"
                    );
                    return Err(TransactionFailure {
                        transaction_id,
                        failed: entry,
                        error,
                        completed: entries,
                    });
                }
            }
        }

        tracing::debug!(
            transaction = %transaction_id,
            executed = entries.len(),
            enqueued = queue.total_enqueued(),
            "queue drained"
        );
        Ok(ExecutionTrace {
            transaction_id,
            block_time: self.env.timestamp,
            entries,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::error::{ErrorKind, RelayError};
    use crate::registry::SenderPattern;
    use crate::types::PermissionLevel;

    fn root(contract: &str, action: &str) -> ActionInvocation {
        ActionInvocation::new(contract, action)
            .unwrap()
            .with_authorization(format!("{contract}@active").parse().unwrap())
    }

    fn run(registry: &Registry, root: ActionInvocation) -> Result<ExecutionTrace, TransactionFailure> {
        let config = ChainConfig::default();
        let env = Environment::detached(&config);
        let mut store = TableStore::new();
        Scheduler::new(registry, &env).run(root, &mut store)
    }

    #[test]
    fn queue_is_fifo_and_counts_pushes() {
        let mut queue = DispatchQueue::seeded(root("a", "x"));
        queue.extend([
            WorkItem::Action(root("b", "x")),
            WorkItem::Action(root("c", "x")),
        ]);
        assert_eq!(queue.len(), 3);
        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|w| w.receiver().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert_eq!(queue.total_enqueued(), 3);
    }

    #[test]
    fn unknown_target_is_recorded_noop() {
        let registry = Registry::new();
        let trace = run(&registry, root("nobody", "send")).unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.entries[0].handlers_run, 0);
        assert_eq!(trace.entries[0].status, ItemStatus::Completed);
    }

    #[test]
    fn children_run_after_earlier_siblings() {
        // a spawns b and c; b spawns d. FIFO gives a, b, c, d.
        let mut registry = Registry::new();
        registry
            .register_action("a", "go", |ctx| {
                ctx.print("a ");
                let auth = vec![ctx.self_permission()];
                ctx.send("b", "go", Vec::new(), auth.clone())?;
                ctx.send("c", "go", Vec::new(), auth)
            })
            .unwrap();
        registry
            .register_action("b", "go", |ctx| {
                ctx.print("b ");
                let auth = vec![ctx.self_permission()];
                ctx.send("d", "go", Vec::new(), auth)
            })
            .unwrap();
        for leaf in ["c", "d"] {
            registry
                .register_action(leaf, "go", move |ctx| {
                    ctx.print(format!("{leaf} "));
                    Ok(())
                })
                .unwrap();
        }

        let trace = run(&registry, root("a", "go")).unwrap();
        assert_eq!(trace.markers(), vec!["a", "b", "c", "d"]);
        assert_eq!(trace.entries[0].spawned, 2);
        let seqs: Vec<usize> = trace.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn multiple_notification_handlers_share_one_buffer() {
        let mut registry = Registry::new();
        registry
            .register_action("origin", "ping", |ctx| ctx.require_recipient("watcher"))
            .unwrap();
        registry
            .register_notification("watcher", SenderPattern::Wildcard, "ping", |ctx| {
                ctx.print("first ");
                ctx.require_recipient("echo")
            })
            .unwrap();
        registry
            .register_notification("watcher", "origin".parse().unwrap(), "ping", |ctx| {
                ctx.print("second ");
                ctx.require_recipient("echo")
            })
            .unwrap();
        registry
            .register_notification("echo", SenderPattern::Wildcard, "ping", |ctx| {
                ctx.print("echo ");
                Ok(())
            })
            .unwrap();

        let trace = run(&registry, root("origin", "ping")).unwrap();
        assert_eq!(trace.markers(), vec!["first", "second", "echo"]);
        assert_eq!(trace.entries[1].handlers_run, 2);
        assert_eq!(trace.entries[1].spawned, 1);
    }

    #[test]
    fn same_recipient_from_different_actions_is_delivered_twice() {
        let mut registry = Registry::new();
        registry
            .register_action("a", "go", |ctx| {
                ctx.require_recipient("watcher")?;
                let auth = vec![ctx.self_permission()];
                ctx.send("a", "again", Vec::new(), auth)
            })
            .unwrap();
        registry
            .register_action("a", "again", |ctx| ctx.require_recipient("watcher"))
            .unwrap();
        for action in ["go", "again"] {
            registry
                .register_notification("watcher", SenderPattern::Wildcard, action, |ctx| {
                    let action = ctx.action().clone();
                    ctx.print(format!("{action} "));
                    Ok(())
                })
                .unwrap();
        }

        let trace = run(&registry, root("a", "go")).unwrap();
        assert_eq!(trace.markers(), vec!["go", "again"]);
        assert_eq!(trace.len(), 4);
    }

    #[test]
    fn abort_stops_dispatch_and_reports_first_failure() {
        let mut registry = Registry::new();
        registry
            .register_action("a", "go", |ctx| {
                ctx.print("a ");
                let bad = vec![PermissionLevel::new("mallory", "active")?];
                let auth = vec![ctx.self_permission()];
                ctx.send("b", "guarded", Vec::new(), bad)?;
                ctx.send("c", "go", Vec::new(), auth)
            })
            .unwrap();
        registry
            .register_action("b", "guarded", |ctx| {
                ctx.print("b ");
                ctx.send("d", "go", Vec::new(), Vec::new())?;
                ctx.require_auth("b")
            })
            .unwrap();
        registry
            .register_action("c", "go", |ctx| {
                ctx.print("c ");
                Ok(())
            })
            .unwrap();

        let failure = run(&registry, root("a", "go")).unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::AuthorizationFailure);
        assert_eq!(failure.failed.seq, 1);
        assert_eq!(failure.failed.status, ItemStatus::Aborted);
        assert_eq!(failure.failed.spawned, 0);
        assert_eq!(failure.completed.len(), 1);
        assert_eq!(failure.markers(), vec!["a", "b"]);
        assert!(matches!(failure.error, RelayError::AuthorizationFailure { .. }));
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let mut registry = Registry::new();
        registry
            .register_action("loop", "step", |ctx| {
                let n: u64 = ctx.data_json()?;
                if n > 0 {
                    let auth = vec![ctx.self_permission()];
                    ctx.send_json("loop", "step", &(n - 1), auth)?;
                }
                Ok(())
            })
            .unwrap();
        let start = root("loop", "step").with_json(&10_000u64).unwrap();
        let trace = run(&registry, start).unwrap();
        assert_eq!(trace.len(), 10_001);
    }
}
