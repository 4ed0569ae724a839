//! Integer addition tool

use async_trait::async_trait;
use chatflow_traits::{Tool, ToolError, ToolOutput, ToolResult};
use serde::Deserialize;
use serde_json::{Value, json};

const NAME: &str = "add_numbers";

#[derive(Debug, Deserialize)]
struct AddNumbersInput {
    i: i64,
    j: i64,
}

/// Adds two integers. The only tool the default agent is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddNumbersTool;

impl AddNumbersTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for AddNumbersTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Adds two integer numbers together and returns the sum."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "i": {
                    "type": "integer",
                    "description": "First addend"
                },
                "j": {
                    "type": "integer",
                    "description": "Second addend"
                }
            },
            "required": ["i", "j"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> ToolResult<ToolOutput> {
        let params: AddNumbersInput = serde_json::from_value(input)
            .map_err(|err| ToolError::invalid_input(NAME, err.to_string()))?;

        let sum = params
            .i
            .checked_add(params.j)
            .ok_or_else(|| ToolError::execution(NAME, "integer overflow"))?;

        Ok(ToolOutput::success(json!(sum)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_two_integers() {
        let output = AddNumbersTool
            .execute(json!({"i": 2, "j": 2}))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.to_observation(), "4");
    }

    #[tokio::test]
    async fn negative_numbers() {
        let output = AddNumbersTool
            .execute(json!({"i": -7, "j": 3}))
            .await
            .unwrap();
        assert_eq!(output.result, json!(-4));
    }

    #[tokio::test]
    async fn rejects_missing_argument() {
        let err = AddNumbersTool.execute(json!({"i": 1})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn rejects_non_integer_argument() {
        let err = AddNumbersTool
            .execute(json!({"i": "two", "j": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn overflow_is_an_execution_error() {
        let err = AddNumbersTool
            .execute(json!({"i": i64::MAX, "j": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }
}
