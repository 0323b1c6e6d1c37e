//! The line protocol spoken by collector plugins on their standard output.
//!
//! - `tokenizer`: splitting a line into words with quote and escape handling
//! - `command`: the command table and the value vocabularies (chart types, algorithms)
//! - `session`: the per-run state machine that turns commands into storage calls
//! - `error`: protocol violations

pub mod command;
pub mod error;
pub mod session;
pub mod tokenizer;

pub use command::{Algorithm, ChartType, Command};
pub use error::ProtocolViolation;
pub use session::{Flow, ProtocolSession};
pub use tokenizer::{split_words, Words, MAX_WORDS};
