use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::engine::{ExecutionBatch, ExecutionEngine};
use crate::functions::CallDescriptor;
use crate::session::{InstanceSet, RunPhase, SessionKey};
use crate::RunnerError;

static RE_ENTRY_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\d+$").unwrap());

pub const FORCE_TERMINATED: &str = "multi_turn:force_terminated";
pub const EMPTY_TURN_MODEL_RESPONSE: &str = "multi_turn:empty_turn_model_response";
pub const INSTANCE_STATE_MISMATCH: &str = "multi_turn:instance_state_mismatch";
pub const EXECUTION_RESPONSE_MISMATCH: &str = "multi_turn:execution_response_mismatch";

/// Pass/fail result of comparing a model transcript with its ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckVerdict {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CheckVerdict {
    pub fn pass() -> Self {
        Self {
            valid: true,
            error_type: None,
            error_message: None,
            details: None,
        }
    }

    pub fn fail(error_type: &str, error_message: impl Into<String>, details: Value) -> Self {
        Self {
            valid: false,
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.into()),
            details: Some(details),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub initial_config: Map<String, Value>,
    #[serde(default)]
    pub involved_classes: Vec<String>,
}

/// Input of a `check` request. Model results are `turns -> steps -> calls`,
/// ground truth is `turns -> calls`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub model_results: Vec<Vec<Vec<CallDescriptor>>>,
    #[serde(default)]
    pub ground_truth: Vec<Vec<CallDescriptor>>,
    #[serde(default)]
    pub test_entry: TestEntry,
    #[serde(default)]
    pub test_category: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

pub(crate) fn default_model_name() -> String {
    "model".to_string()
}

#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, request: &CheckRequest) -> Result<CheckVerdict, RunnerError>;
}

/// Replays model and ground-truth calls turn by turn and compares backend
/// state and execution results after every turn.
pub struct MultiTurnChecker {
    engine: Arc<dyn ExecutionEngine>,
}

impl MultiTurnChecker {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self { engine }
    }

    async fn run_calls(
        &self,
        calls: &[CallDescriptor],
        entry: &TestEntry,
        session: &SessionKey,
        long_context: bool,
        instances: &mut InstanceSet,
    ) -> Result<Vec<String>, RunnerError> {
        self.engine
            .execute(
                ExecutionBatch {
                    calls,
                    initial_config: &entry.initial_config,
                    involved_classes: &entry.involved_classes,
                    session,
                    phase: RunPhase::Evaluation,
                    long_context,
                },
                instances,
            )
            .await
    }
}

#[async_trait]
impl Checker for MultiTurnChecker {
    async fn check(&self, request: &CheckRequest) -> Result<CheckVerdict, RunnerError> {
        let entry = &request.test_entry;
        let model_turns = &request.model_results;
        let truth_turns = &request.ground_truth;

        if model_turns.len() != truth_turns.len() {
            return Ok(CheckVerdict::fail(
                FORCE_TERMINATED,
                format!(
                    "Model was force-terminated during inference phase. The length of the model \
                     result turns ({}) does not match the length of the ground truth turns ({}).",
                    model_turns.len(),
                    truth_turns.len()
                ),
                json!({}),
            ));
        }

        let long_context = is_long_context(&entry.id, &request.test_category);
        let model_key = SessionKey::new(&request.model_name, &entry.id);
        let truth_key = SessionKey::new(format!("{}_ground_truth", request.model_name), &entry.id);
        let mut model_instances = InstanceSet::new();
        let mut truth_instances = InstanceSet::new();

        let mut model_results_so_far: Vec<String> = Vec::new();
        let mut execution_log: Vec<Value> = Vec::new();

        for (turn_index, (model_turn, truth_calls)) in model_turns.iter().zip(truth_turns).enumerate() {
            let mut turn_model_results = Vec::new();
            for step in model_turn {
                let results = self
                    .run_calls(step, entry, &model_key, long_context, &mut model_instances)
                    .await?;
                turn_model_results.extend(results);
            }
            let truth_results = self
                .run_calls(truth_calls, entry, &truth_key, long_context, &mut truth_instances)
                .await?;

            model_results_so_far.extend(turn_model_results.iter().cloned());
            execution_log.push(json!({
                "model": turn_model_results,
                "ground_truth": truth_results,
            }));

            if truth_calls.is_empty() {
                continue;
            }

            if is_empty_turn(model_turn) {
                return Ok(CheckVerdict::fail(
                    EMPTY_TURN_MODEL_RESPONSE,
                    format!("Model response list is empty for turn {turn_index}"),
                    json!({ "execution_result": execution_log }),
                ));
            }

            if let Some(differences) = state_differences(&model_instances, &truth_instances) {
                let (class_name, fields) = differences;
                tracing::debug!(turn = turn_index, class = %class_name, "state mismatch");
                return Ok(CheckVerdict::fail(
                    INSTANCE_STATE_MISMATCH,
                    format!(
                        "Model instance for {class_name} does not match the state with ground truth instance."
                    ),
                    json!({
                        "differences": fields,
                        "execution_result": execution_log,
                    }),
                ));
            }

            let missing = missing_results(&model_results_so_far, &truth_results);
            if !missing.is_empty() {
                return Ok(CheckVerdict::fail(
                    EXECUTION_RESPONSE_MISMATCH,
                    format!(
                        "Model response execution results so far does not contain all the ground \
                         truth response execution results for turn {turn_index}."
                    ),
                    json!({
                        "missing_items": missing,
                        "model_response (including all previous turns)": model_results_so_far,
                        "ground_truth_response (only the current turn)": truth_results,
                        "execution_result": execution_log,
                    }),
                ));
            }
        }

        Ok(CheckVerdict::pass())
    }
}

/// True when the entry's category asks for verbose long-context backends.
pub fn is_long_context(test_entry_id: &str, test_category: &str) -> bool {
    let derived = RE_ENTRY_INDEX.replace(test_entry_id, "");
    let category = if derived.is_empty() {
        test_category
    } else {
        derived.as_ref()
    };
    category.contains("long_context") || category.contains("composite")
}

fn is_empty_turn(turn: &[Vec<CallDescriptor>]) -> bool {
    match turn {
        [] => true,
        [only] => only.is_empty(),
        _ => false,
    }
}

/// First class whose snapshot differs, with the differing top-level fields.
fn state_differences(model: &InstanceSet, truth: &InstanceSet) -> Option<(String, Map<String, Value>)> {
    let model_states = model.states();
    for (class_name, truth_state) in truth.states() {
        let model_state = model_states.get(&class_name).cloned().unwrap_or(Value::Null);
        if model_state == truth_state {
            continue;
        }

        let mut fields = Map::new();
        match (&model_state, &truth_state) {
            (Value::Object(model_fields), Value::Object(truth_fields)) => {
                for (field, truth_value) in truth_fields {
                    let model_value = model_fields.get(field).unwrap_or(&Value::Null);
                    if model_value != truth_value {
                        fields.insert(
                            field.clone(),
                            json!({ "model": model_value, "ground_truth": truth_value }),
                        );
                    }
                }
            }
            _ => {
                fields.insert(
                    "state".to_string(),
                    json!({ "model": model_state, "ground_truth": truth_state }),
                );
            }
        }
        return Some((class_name, fields));
    }
    None
}

/// Ground-truth results not matched one-for-one by a model result.
fn missing_results(model: &[String], truth: &[String]) -> Vec<String> {
    let mut available: Vec<&String> = model.iter().collect();
    let mut missing = Vec::new();
    for expected in truth {
        match available.iter().position(|candidate| *candidate == expected) {
            Some(index) => {
                available.swap_remove(index);
            }
            None => missing.push(expected.clone()),
        }
    }
    missing
}
