pub mod config;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, TreeFlowError};
pub use state::AgentState;
pub use traits::ConditionEvaluator;
pub use types::*;
