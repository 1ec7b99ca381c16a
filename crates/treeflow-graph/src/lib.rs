pub mod condition;
pub mod connection;
pub mod edge;
pub mod flow;
pub mod question;
pub mod router;
pub mod step;
pub mod traversal;
pub mod validate;

pub use condition::ExpressionEvaluator;
pub use connection::StepConnection;
pub use edge::{StepInput, StepOutput};
pub use flow::TreeFlow;
pub use question::{StepFewShotExample, StepQuestion};
pub use router::{RouteOutcome, Router, TerminalReason, Transition};
pub use step::Step;
pub use traversal::{Traversal, TraversalRecord};
pub use validate::{validate, validate_with, Issue, Severity, ValidationReport};
