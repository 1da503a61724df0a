pub mod chain;
pub mod config;
pub mod error;
pub mod name;
pub mod registry;
pub mod runtime;
pub mod scenario;
pub mod scheduler;
pub mod script;
pub mod table;
pub mod trace;
pub mod types;

pub use chain::{Account, Chain};
pub use error::{ErrorKind, RelayError, Result};
pub use name::{IntoName, Name};
pub use registry::{Handler, Registry, SenderPattern};
pub use runtime::ApplyContext;
pub use trace::{ExecutionTrace, TransactionFailure};
pub use types::{ActionInvocation, NotificationBroadcast, PermissionLevel, WorkItem};
