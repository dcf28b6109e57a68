use std::collections::BTreeMap;

use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::call_syntax;
use crate::RunnerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: FunctionParameters,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: FunctionParameters::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, parameter: FunctionParameter) -> Self {
        self.add_parameter(parameter);
        self
    }

    pub fn add_parameter(&mut self, parameter: FunctionParameter) {
        let FunctionParameter {
            name,
            mut schema,
            description,
            required,
            default,
        } = parameter;

        if let Some(description) = description {
            schema
                .as_object_mut()
                .map(|object| object.insert("description".to_string(), Value::String(description)));
        }

        if let Some(default) = default {
            schema
                .as_object_mut()
                .map(|object| object.insert("default".to_string(), default));
        }

        if required {
            self.parameters.required.push(name.clone());
        }

        self.parameters.order.push(name.clone());
        self.parameters.properties.insert(name, schema);
    }

    /// Folds positional arguments into the keyword map using declaration order.
    pub fn bind(&self, call: &FunctionCall) -> Result<Value, RunnerError> {
        let order = &self.parameters.order;
        if call.positional.len() > order.len() {
            return Err(RunnerError::InvalidFunctionArguments(format!(
                "{}() takes {} positional argument(s) but {} were given",
                self.name,
                order.len(),
                call.positional.len()
            )));
        }

        let mut bound = call.arguments.clone();
        for (name, value) in order.iter().zip(&call.positional) {
            if bound.contains_key(name) {
                return Err(RunnerError::InvalidFunctionArguments(format!(
                    "{}() got multiple values for argument '{name}'",
                    self.name
                )));
            }
            bound.insert(name.clone(), value.clone());
        }

        Ok(Value::Object(bound))
    }

    pub fn validator(&self) -> Result<ArgumentValidator, RunnerError> {
        let schema = serde_json::to_value(&self.parameters)?;
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| RunnerError::InvalidFunctionArguments(e.to_string()))?;
        Ok(ArgumentValidator {
            function: self.name.clone(),
            schema: compiled,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
    #[serde(skip)]
    order: Vec<String>,
}

impl FunctionParameters {
    pub fn new() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: Some(false),
            order: Vec::new(),
        }
    }
}

impl Default for FunctionParameters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub schema: Value,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
}

impl FunctionParameter {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            description: None,
            required: true,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }
}

/// Compiled parameter schema for one function.
pub struct ArgumentValidator {
    function: String,
    schema: JSONSchema,
}

impl ArgumentValidator {
    pub fn validate(&self, arguments: &Value) -> Result<(), RunnerError> {
        match self.schema.validate(arguments) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let messages = errors.take(5).map(|e| e.to_string()).collect::<Vec<_>>();
                Err(RunnerError::InvalidFunctionArguments(format!(
                    "{}: {}",
                    self.function,
                    messages.join("; ")
                )))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Map<String, Value>,
    pub positional: Vec<Value>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            positional: Vec::new(),
        }
    }
}

/// One entry of a call list: either call text (`cd(folder='docs')`) or a
/// structured `{"name": ..., "arguments": {...}}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallDescriptor {
    Text(String),
    Structured {
        name: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },
}

impl CallDescriptor {
    pub fn to_call(&self) -> Result<FunctionCall, RunnerError> {
        match self {
            CallDescriptor::Text(text) => call_syntax::parse_call(text),
            CallDescriptor::Structured { name, arguments } => {
                Ok(FunctionCall::new(name.clone(), arguments.clone()))
            }
        }
    }
}

impl From<&str> for CallDescriptor {
    fn from(text: &str) -> Self {
        CallDescriptor::Text(text.to_string())
    }
}

pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema.schema).unwrap_or_else(|_| json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wc_definition() -> FunctionDefinition {
        FunctionDefinition::new("wc")
            .with_parameter(FunctionParameter::new("file_name", json_schema_for::<String>()))
            .with_parameter(
                FunctionParameter::new("mode", json_schema_for::<String>())
                    .with_default(json!("l")),
            )
    }

    #[test]
    fn positional_arguments_bind_in_declaration_order() {
        let definition = wc_definition();
        let call = FunctionCall {
            name: "wc".to_string(),
            arguments: Map::new(),
            positional: vec![json!("notes.txt"), json!("w")],
        };

        let bound = definition.bind(&call).unwrap();
        assert_eq!(bound, json!({"file_name": "notes.txt", "mode": "w"}));
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let definition = wc_definition();
        let mut arguments = Map::new();
        arguments.insert("file_name".to_string(), json!("a.txt"));
        let call = FunctionCall {
            name: "wc".to_string(),
            arguments,
            positional: vec![json!("b.txt")],
        };

        let error = definition.bind(&call).unwrap_err();
        assert!(error.to_string().contains("multiple values for argument 'file_name'"));
    }

    #[test]
    fn validator_rejects_missing_and_unexpected_arguments() {
        let validator = wc_definition().validator().unwrap();

        assert!(validator.validate(&json!({"file_name": "a.txt"})).is_ok());
        assert!(validator.validate(&json!({})).is_err());
        assert!(validator
            .validate(&json!({"file_name": "a.txt", "colour": "red"}))
            .is_err());
        assert!(validator.validate(&json!({"file_name": 4})).is_err());
    }

    #[test]
    fn descriptors_accept_text_and_structured_forms() {
        let parsed: Vec<CallDescriptor> =
            serde_json::from_value(json!(["pwd()", {"name": "cd", "arguments": {"folder": "docs"}}]))
                .unwrap();

        assert_eq!(parsed[0], CallDescriptor::Text("pwd()".to_string()));
        let call = parsed[1].to_call().unwrap();
        assert_eq!(call.name, "cd");
        assert_eq!(call.arguments.get("folder"), Some(&json!("docs")));
    }
}
