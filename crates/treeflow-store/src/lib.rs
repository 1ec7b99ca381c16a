pub mod store;

pub use store::{FlowSummary, SqliteStore};
