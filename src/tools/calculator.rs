//! Integer arithmetic tool.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{Tool, ToolError, ToolOptions};

/// Evaluates `a <op> b` over integers
#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator;

impl Calculator {
    pub const NAME: &'static str = "calculate";

    /// Evaluate a single binary expression
    pub fn evaluate(expression: &str) -> Result<i64, ToolError> {
        let pattern = Regex::new(r"^(-?\d+)\s*([+\-*/])\s*(-?\d+)$")
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let caps = pattern.captures(expression.trim()).ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "expected '<integer> <op> <integer>', got '{}'",
                expression
            ))
        })?;

        let lhs = parse_operand(&caps[1])?;
        let rhs = parse_operand(&caps[3])?;

        let result = match &caps[2] {
            "+" => lhs.checked_add(rhs),
            "-" => lhs.checked_sub(rhs),
            "*" => lhs.checked_mul(rhs),
            "/" => {
                if rhs == 0 {
                    return Err(ToolError::InvalidArguments("division by zero".to_string()));
                }
                lhs.checked_div(rhs)
            }
            op => return Err(ToolError::InvalidArguments(format!("unsupported operator '{}'", op))),
        };

        result.ok_or_else(|| ToolError::Execution("integer overflow".to_string()))
    }
}

fn parse_operand(raw: &str) -> Result<i64, ToolError> {
    raw.parse()
        .map_err(|_| ToolError::InvalidArguments(format!("operand out of range: {}", raw)))
}

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Evaluate a basic arithmetic expression with two integers, e.g. '12 * 7'"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Expression of the form '<integer> <+|-|*|/> <integer>'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value, _options: &ToolOptions) -> Result<Value, ToolError> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'expression'".to_string()))?;

        let result = Self::evaluate(expression)?;
        Ok(json!({ "expression": expression, "result": result }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations() {
        assert_eq!(Calculator::evaluate("2 + 3").unwrap(), 5);
        assert_eq!(Calculator::evaluate("10-4").unwrap(), 6);
        assert_eq!(Calculator::evaluate("-6 * 7").unwrap(), -42);
        assert_eq!(Calculator::evaluate(" 9 / 2 ").unwrap(), 4);
    }

    #[test]
    fn test_rejects_division_by_zero() {
        let err = Calculator::evaluate("1 / 0").unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_rejects_other_input() {
        assert!(Calculator::evaluate("2 ^ 3").is_err());
        assert!(Calculator::evaluate("two plus three").is_err());
        assert!(Calculator::evaluate("1 + 2 + 3").is_err());
    }

    #[tokio::test]
    async fn test_execute_returns_result_object() {
        let value = Calculator
            .execute(json!({"expression": "6 * 7"}), &ToolOptions::default())
            .await
            .unwrap();
        assert_eq!(value["result"], 42);

        let err = Calculator
            .execute(json!({}), &ToolOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
