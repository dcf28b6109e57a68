use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backends::{parse_args, unknown_function, Backend};
use crate::functions::{json_schema_for, FunctionDefinition, FunctionParameter};
use crate::RunnerError;

const CLASS_NAME: &str = "MathAPI";

static FUNCTIONS: Lazy<Vec<FunctionDefinition>> = Lazy::new(|| {
    let binary = |name: &str, description: &str| {
        FunctionDefinition::new(name)
            .with_description(description)
            .with_parameter(FunctionParameter::new("a", json_schema_for::<f64>()))
            .with_parameter(FunctionParameter::new("b", json_schema_for::<f64>()))
    };

    vec![
        binary("add", "Add two numbers."),
        binary("subtract", "Subtract b from a."),
        binary("multiply", "Multiply two numbers."),
        binary("divide", "Divide a by b."),
        FunctionDefinition::new("mean")
            .with_description("Arithmetic mean of a list of numbers.")
            .with_parameter(FunctionParameter::new("numbers", json_schema_for::<Vec<f64>>())),
        FunctionDefinition::new("absolute_value")
            .with_description("Absolute value of a number.")
            .with_parameter(FunctionParameter::new("number", json_schema_for::<f64>())),
        FunctionDefinition::new("square_root")
            .with_description("Square root of a number, rounded to `precision` decimals.")
            .with_parameter(FunctionParameter::new("number", json_schema_for::<f64>()))
            .with_parameter(
                FunctionParameter::new("precision", json_schema_for::<u32>())
                    .with_default(json!(6)),
            ),
    ]
});

#[derive(Deserialize)]
struct BinaryArgs {
    a: f64,
    b: f64,
}

#[derive(Deserialize)]
struct MeanArgs {
    numbers: Vec<f64>,
}

#[derive(Deserialize)]
struct NumberArgs {
    number: f64,
}

#[derive(Deserialize)]
struct SquareRootArgs {
    number: f64,
    #[serde(default = "default_precision")]
    precision: u32,
}

fn default_precision() -> u32 {
    6
}

/// Stateless arithmetic helpers.
#[derive(Debug, Default)]
pub struct MathApi;

impl MathApi {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for MathApi {
    fn class_name(&self) -> &'static str {
        CLASS_NAME
    }

    fn functions(&self) -> &'static [FunctionDefinition] {
        &FUNCTIONS
    }

    fn load_scenario(&mut self, _config: &Value, _long_context: bool) -> Result<(), RunnerError> {
        Ok(())
    }

    fn invoke(&mut self, function: &str, arguments: &Value) -> Result<Value, RunnerError> {
        let result = match function {
            "add" => {
                let BinaryArgs { a, b } = parse_args(function, arguments)?;
                a + b
            }
            "subtract" => {
                let BinaryArgs { a, b } = parse_args(function, arguments)?;
                a - b
            }
            "multiply" => {
                let BinaryArgs { a, b } = parse_args(function, arguments)?;
                a * b
            }
            "divide" => {
                let BinaryArgs { a, b } = parse_args(function, arguments)?;
                if b == 0.0 {
                    return Ok(json!({ "error": "Cannot divide by zero" }));
                }
                a / b
            }
            "mean" => {
                let MeanArgs { numbers } = parse_args(function, arguments)?;
                if numbers.is_empty() {
                    return Ok(json!({ "error": "Cannot calculate mean of an empty list" }));
                }
                numbers.iter().sum::<f64>() / numbers.len() as f64
            }
            "absolute_value" => {
                let NumberArgs { number } = parse_args(function, arguments)?;
                number.abs()
            }
            "square_root" => {
                let SquareRootArgs { number, precision } = parse_args(function, arguments)?;
                if number < 0.0 {
                    return Ok(json!({
                        "error": "Cannot calculate square root of a negative number"
                    }));
                }
                let scale = 10f64.powi(precision.min(15) as i32);
                (number.sqrt() * scale).round() / scale
            }
            other => return Err(unknown_function(CLASS_NAME, other)),
        };
        Ok(json!({ "result": result }))
    }

    fn state(&self) -> Value {
        Value::Null
    }
}
