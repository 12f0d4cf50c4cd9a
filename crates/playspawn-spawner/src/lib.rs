//! Playbook-driven server lifecycle.
//!
//! [`PlaybookSpawner`] starts, polls and stops a single-user server by running
//! create/update/poll/destroy playbooks, keeps the server state they report,
//! and relays start progress to observers.

pub mod error;
pub mod progress;
pub mod spawner;
pub mod state;

pub use error::{Result, SpawnerError};
pub use progress::{ProgressQueue, ProgressStream};
pub use spawner::{GRACEFUL_VAR, Phase, PlaybookSpawner, PollStatus, RUNNING_FIELD, SpawnerBuilder};
pub use state::{Endpoint, STATE_KEY, ServerState};
