//! Shared types for the playspawn lifecycle controller.
//!
//! These types cross crate boundaries: the runner produces [`Event`]s and
//! [`Stats`], the spawner persists [`FactMap`]s, and both sides of the progress
//! queue exchange [`ProgressSignal`]s.

pub mod event;
pub mod progress;

pub use event::{
    Event, FactMap, PLAYBOOK_EVENT_PREFIX, STATS_EVENT, Stats, TASK_FAILED_EVENT, TASK_OK_EVENT,
};
pub use progress::{ProgressEvent, ProgressSignal};
