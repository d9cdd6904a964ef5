//! envdiff - snapshot diff engine for environment graphs
//!
//! Polls a backend for the structure of a diff between two snapshots, then
//! pages in per-node property detail. Uses Elm Architecture
//! (Session/Message/Update/Command); [`runtime::Driver`] carries out the
//! effects, running backend calls on a worker thread.

pub mod backend;
pub mod command;
pub mod config;
pub mod cursor;
pub mod error;
pub mod label;
pub mod logging;
pub mod message;
pub mod runtime;
pub mod session;
pub mod table;
pub mod tree;
pub mod update;
pub mod view;

pub use backend::{CliBackend, DiffBackend, DiffParams, SqliteBackend};
pub use config::DiffConfig;
pub use error::DiffError;
pub use message::Message;
pub use runtime::Driver;
pub use session::{DiffSession, DiffView, Phase};
pub use tree::{DiffTree, NodeKey, Side};
pub use update::update;
pub use view::{ViewState, render_lines};
