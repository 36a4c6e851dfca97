//! Core library for ferry, a coordinator for long-running resumable
//! network transfers.
//!
//! The centerpiece is [`coordinator::Coordinator`]: submit URLs, get task
//! ids back, and watch them move through a queue, a concurrency cap, and a
//! pause/resume/cancel lifecycle while progress and state changes stream out
//! as events. Byte-level I/O is delegated to a [`transfer::TransferDriver`]
//! (curl-based by default) and durability to a [`store::StateStore`]
//! (SQLite by default).

pub mod config;
pub mod coordinator;
pub mod disk;
pub mod error;
pub mod filename;
pub mod logging;
pub mod net;
pub mod queue;
pub mod store;
pub mod task;
pub mod transfer;

pub use config::FerryConfig;
pub use coordinator::{Coordinator, Event, SubmitOptions};
pub use error::{CoordinatorError, ErrorClass, TaskError};
pub use task::{Task, TaskId, TaskState};
