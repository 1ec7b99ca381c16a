use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::types::{ConnectionId, InputId, OutputId, StepId};

/// A validated wire from one step output to one step input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConnection {
    pub id: ConnectionId,
    pub source_output: OutputId,
    pub target_input: InputId,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StepConnection {
    pub fn new(source_output: OutputId, target_input: InputId) -> Self {
        Self {
            id: ConnectionId::new(),
            source_output,
            target_input,
            created_at: Utc::now(),
        }
    }
}

/// Check whether `output` may be wired to `input`.
///
/// `existing` is the connection currently bound to `output`, if any. An
/// output carries at most one connection, so that single row is enough to
/// detect both a repeated pair and a second wire.
pub fn check_connection(
    existing: Option<&StepConnection>,
    output: &OutputId,
    output_step: &StepId,
    input: &InputId,
    input_step: &StepId,
) -> Result<()> {
    if let Some(conn) = existing {
        if &conn.target_input == input {
            return Err(TreeFlowError::DuplicateConnection {
                output: output.to_string(),
                input: input.to_string(),
            });
        }
        return Err(TreeFlowError::OutputAlreadyWired {
            output: output.to_string(),
            connection: conn.id.to_string(),
        });
    }

    if output_step == input_step {
        return Err(TreeFlowError::SelfLoop {
            step: output_step.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_pair_between_steps_is_allowed() {
        let (a, b) = (StepId::new(), StepId::new());
        assert!(check_connection(None, &OutputId::new(), &a, &InputId::new(), &b).is_ok());
    }

    #[test]
    fn test_same_step_is_self_loop() {
        let a = StepId::new();
        let err = check_connection(None, &OutputId::new(), &a, &InputId::new(), &a).unwrap_err();
        assert!(matches!(err, TreeFlowError::SelfLoop { .. }));
    }

    #[test]
    fn test_repeat_pair_is_duplicate() {
        let (a, b) = (StepId::new(), StepId::new());
        let conn = StepConnection::new(OutputId::new(), InputId::new());
        let err = check_connection(
            Some(&conn),
            &conn.source_output,
            &a,
            &conn.target_input,
            &b,
        )
        .unwrap_err();
        assert!(matches!(err, TreeFlowError::DuplicateConnection { .. }));
    }

    #[test]
    fn test_second_target_is_already_wired() {
        let (a, b) = (StepId::new(), StepId::new());
        let conn = StepConnection::new(OutputId::new(), InputId::new());
        let err = check_connection(Some(&conn), &conn.source_output, &a, &InputId::new(), &b)
            .unwrap_err();
        match err {
            TreeFlowError::OutputAlreadyWired { connection, .. } => {
                assert_eq!(connection, conn.id.to_string())
            }
            other => panic!("expected OutputAlreadyWired, got {other:?}"),
        }
    }
}
