//! collab-core: shared domain types for the Collab task fabric.
//!
//! Every other crate in the workspace builds on these types:
//!
//! - **`task`**: the serializable unit of work (`Task`, `Priority`, `TaskType`)
//! - **`card`**: node identity records and the membership `Digest`
//! - **`pipeline`**: ordered stage arena for multi-step tasks
//! - **`config`**: `collab.toml` parsing

pub mod card;
pub mod config;
pub mod pipeline;
pub mod task;

pub use card::{Card, Digest, ParseCardError, epoch_secs};
pub use config::{CollabConfig, ConfigError};
pub use pipeline::{Pipeline, Stage};
pub use task::{Priority, Task, TaskType, Value};
