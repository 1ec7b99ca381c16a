use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeFlowError {
    // Lookup errors
    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Step output not found: {0}")]
    OutputNotFound(String),

    #[error("Step input not found: {0}")]
    InputNotFound(String),

    #[error("Step connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Step question not found: {0}")]
    QuestionNotFound(String),

    #[error("TreeFlow not found: {0}")]
    FlowNotFound(String),

    // Entry point errors
    #[error("TreeFlow has no first step")]
    NoEntryPoint,

    #[error("TreeFlow already has a first step: {existing}")]
    MultipleEntryPoints { existing: String },

    #[error("Cannot remove first step {0} while other steps remain; designate a new first step")]
    EntryPointRequired(String),

    // Wiring errors
    #[error("Output {output} is already connected to input {input}")]
    DuplicateConnection { output: String, input: String },

    #[error("Output {output} is already wired through connection {connection}")]
    OutputAlreadyWired { output: String, connection: String },

    #[error("Step {step} cannot connect one of its outputs to one of its own inputs")]
    SelfLoop { step: String },

    #[error("Step {referenced} does not belong to TreeFlow {flow}")]
    CrossFlowReference { flow: String, referenced: String },

    #[error("Duplicate id in TreeFlow: {0}")]
    DuplicateId(String),

    // Authoring errors
    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("TreeFlow failed validation with {0} error(s)")]
    InvalidFlow(usize),

    // Routing errors
    #[error("Condition error: {expr}: {message}")]
    Condition { expr: String, message: String },

    #[error("Step {step} visited more than {max_visits} times, traversal stopped")]
    LoopLimit { step: String, max_visits: usize },

    #[error("Traversal already finished")]
    TraversalFinished,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TreeFlowError>;
