//! Mutation event vocabulary for the event-decorated repository.

use crate::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The mutation events a repository can emit.
///
/// `BeforeRemove` fires before rows are deleted (so listeners can still read
/// related state); the other three fire after the write succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Create,
    Update,
    Remove,
    BeforeRemove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Remove => "remove",
            EventKind::BeforeRemove => "beforeRemove",
        };
        f.write_str(name)
    }
}

/// Handle returned by listener registration; pass it back to deregister that
/// one listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Listener outcome. An `Err` is logged by the dispatcher and never propagated
/// to the caller of the mutation.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Boxed future returned by a listener invocation.
pub type BoxListenerFuture = Pin<Box<dyn Future<Output = ListenerResult> + Send>>;

/// An async mutation listener. Receives the event payload row; see the
/// decorator documentation for the exact payload per event kind.
pub type Listener = Arc<dyn Fn(Row) -> BoxListenerFuture + Send + Sync>;
