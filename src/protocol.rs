use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checker::{default_model_name, CheckRequest, CheckVerdict};
use crate::error::ErrorKind;
use crate::functions::CallDescriptor;
use crate::session::{RunPhase, SessionKey};
use crate::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Execute,
    Check,
    Reset,
}

impl FromStr for Action {
    type Err = RunnerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "execute" => Ok(Action::Execute),
            "check" => Ok(Action::Check),
            "reset" => Ok(Action::Reset),
            other => Err(RunnerError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Execute => write!(f, "execute"),
            Action::Check => write!(f, "check"),
            Action::Reset => write!(f, "reset"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub func_call_list: Vec<CallDescriptor>,
    #[serde(default)]
    pub initial_config: Map<String, Value>,
    #[serde(default)]
    pub involved_classes: Vec<String>,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub test_entry_id: String,
    #[serde(default)]
    pub long_context: bool,
    #[serde(default)]
    pub is_eval_run: bool,
}

impl ExecuteRequest {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.model_name, &self.test_entry_id)
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_eval_flag(self.is_eval_run)
    }
}

/// Fields are kept as raw JSON so that any shape decodes; reset never fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub model_name: Option<Value>,
    #[serde(default)]
    pub test_entry_id: Option<Value>,
}

impl ResetRequest {
    /// `None` unless both fields are non-empty strings.
    pub fn session_key(&self) -> Option<SessionKey> {
        let model = non_empty_str(self.model_name.as_ref())?;
        let entry = non_empty_str(self.test_entry_id.as_ref())?;
        Some(SessionKey::new(model, entry))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Execute(ExecuteRequest),
    Check(CheckRequest),
    Reset(ResetRequest),
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Request::Execute(_) => Action::Execute,
            Request::Check(_) => Action::Check,
            Request::Reset(_) => Action::Reset,
        }
    }
}

/// Decodes one input line. The returned id is `null` when the line is not a
/// JSON object; otherwise it is echoed even if the request itself is invalid.
pub fn parse_line(line: &str) -> (Value, Result<Request, RunnerError>) {
    let payload: Value = match serde_json::from_str(line) {
        Ok(payload) => payload,
        Err(e) => return (Value::Null, Err(RunnerError::Parse(e.to_string()))),
    };
    let Value::Object(fields) = payload else {
        return (
            Value::Null,
            Err(RunnerError::InvalidRequest(
                "request must be a JSON object".to_string(),
            )),
        );
    };

    let id = fields.get("id").cloned().unwrap_or(Value::Null);
    let request = decode_request(fields);
    (id, request)
}

fn decode_request(fields: Map<String, Value>) -> Result<Request, RunnerError> {
    let action = match fields.get("action") {
        Some(Value::String(name)) => name.parse::<Action>()?,
        Some(other) => return Err(RunnerError::UnknownAction(other.to_string())),
        None => return Err(RunnerError::UnknownAction("null".to_string())),
    };

    let payload = Value::Object(fields);
    Ok(match action {
        Action::Execute => Request::Execute(decode_payload(action, payload)?),
        Action::Check => Request::Check(decode_payload(action, payload)?),
        Action::Reset => Request::Reset(decode_payload(action, payload)?),
    })
}

fn decode_payload<T: DeserializeOwned>(action: Action, payload: Value) -> Result<T, RunnerError> {
    serde_json::from_value(payload)
        .map_err(|e| RunnerError::InvalidRequest(format!("{action}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Executed { results: Vec<String> },
    Checked { result: CheckVerdict },
    Reset { reset: bool },
    Error { error: String, error_kind: ErrorKind },
}

/// One output line: the echoed id plus an action-specific body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn new(id: Value, body: ResponseBody) -> Self {
        Self { id, body }
    }

    pub fn error(id: Value, error: &RunnerError) -> Self {
        Self::new(
            id,
            ResponseBody::Error {
                error: error.to_string(),
                error_kind: error.kind(),
            },
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error { .. })
    }

    pub fn to_line(&self) -> Result<String, RunnerError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_payload_defaults() {
        let (id, request) = parse_line(r#"{"id": 7, "action": "execute"}"#);
        assert_eq!(id, json!(7));
        let Request::Execute(execute) = request.unwrap() else {
            panic!("expected execute request");
        };
        assert!(execute.func_call_list.is_empty());
        assert_eq!(execute.session_key(), SessionKey::new("model", ""));
        assert_eq!(execute.phase(), RunPhase::Inference);
    }

    #[test]
    fn mixed_call_descriptors_decode() {
        let line = json!({
            "id": "a",
            "action": "execute",
            "func_call_list": ["pwd()", {"name": "cd", "arguments": {"folder": "docs"}}],
            "is_eval_run": true
        })
        .to_string();
        let (_, request) = parse_line(&line);
        let Request::Execute(execute) = request.unwrap() else {
            panic!("expected execute request");
        };
        assert_eq!(execute.func_call_list.len(), 2);
        assert_eq!(execute.phase(), RunPhase::Evaluation);
    }

    #[test]
    fn malformed_and_unknown_requests() {
        let (id, request) = parse_line("{not json");
        assert_eq!(id, Value::Null);
        assert_eq!(request.unwrap_err().kind(), ErrorKind::ParseError);

        let (id, request) = parse_line(r#"{"id": "x", "action": "explode"}"#);
        assert_eq!(id, json!("x"));
        assert_eq!(request.unwrap_err().to_string(), "unknown action: explode");

        let (_, request) = parse_line(r#"{"id": 1}"#);
        assert_eq!(request.unwrap_err().to_string(), "unknown action: null");

        let (id, request) = parse_line(r#"{"id": 2, "action": "execute", "involved_classes": "MathAPI"}"#);
        assert_eq!(id, json!(2));
        assert_eq!(request.unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn reset_requires_both_fields() {
        let reset = ResetRequest {
            model_name: Some(json!("gpt")),
            test_entry_id: Some(json!("")),
        };
        assert!(reset.session_key().is_none());
        assert!(ResetRequest::default().session_key().is_none());

        let reset = ResetRequest {
            model_name: Some(json!("gpt")),
            test_entry_id: Some(json!("multi_turn_base_1")),
        };
        assert_eq!(reset.session_key(), Some(SessionKey::new("gpt", "multi_turn_base_1")));
    }

    #[test]
    fn reset_accepts_fields_of_any_type() {
        let (id, request) =
            parse_line(r#"{"id": 5, "action": "reset", "model_name": 3, "test_entry_id": "x"}"#);
        assert_eq!(id, json!(5));
        let Request::Reset(reset) = request.unwrap() else {
            panic!("expected reset request");
        };
        assert!(reset.session_key().is_none());

        let (_, request) = parse_line(
            r#"{"action": "reset", "model_name": ["gpt"], "test_entry_id": {"n": 1}}"#,
        );
        assert!(matches!(request, Ok(Request::Reset(_))));
    }

    #[test]
    fn responses_serialize_flat() {
        let ok = Response::new(json!(1), ResponseBody::Reset { reset: true });
        assert_eq!(ok.to_line().unwrap(), "{\"id\":1,\"reset\":true}\n");

        let failed = Response::error(Value::Null, &RunnerError::Parse("bad".to_string()));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"id": null, "error": "bad", "error_kind": "parse_error"})
        );
        assert!(failed.is_error());
    }
}
