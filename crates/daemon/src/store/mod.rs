// Document store: SQLite backing + typed document layer.

pub mod db;
pub mod docs;

pub use db::PollDb;
pub use docs::{Decision, DocEvent, DocPath, DocStore, DocWrite, VoteCreated};
