use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Parse(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown backend class '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownBackend {
        name: String,
        suggestion: Option<String>,
    },

    #[error("backend class '{class}' has no implementation for module '{module_path}'")]
    MissingImplementation { class: String, module_path: String },

    #[error("failed to load scenario for {class}: {message}")]
    ScenarioLoad { class: String, message: String },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("invalid call syntax: {0}")]
    CallSyntax(String),

    #[error("function '{0}' is not available on the involved backends")]
    UnknownFunction(String),

    #[error("invalid function arguments: {0}")]
    InvalidFunctionArguments(String),

    #[error("Function call {0} is not allowed.")]
    DisallowedFunction(String),

    #[error("{function}: {message}")]
    FunctionExecution { function: String, message: String },

    #[error("check failed: {0}")]
    Check(String),
}

/// Failure class reported to callers alongside the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    UnknownAction,
    InvalidRequest,
    ResolutionError,
    CollaboratorError,
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::Parse(_) => ErrorKind::ParseError,
            RunnerError::UnknownAction(_) => ErrorKind::UnknownAction,
            RunnerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RunnerError::UnknownBackend { .. }
            | RunnerError::MissingImplementation { .. }
            | RunnerError::Registry(_) => ErrorKind::ResolutionError,
            RunnerError::Io(_)
            | RunnerError::Serialization(_)
            | RunnerError::ScenarioLoad { .. }
            | RunnerError::CallSyntax(_)
            | RunnerError::UnknownFunction(_)
            | RunnerError::InvalidFunctionArguments(_)
            | RunnerError::DisallowedFunction(_)
            | RunnerError::FunctionExecution { .. }
            | RunnerError::Check(_) => ErrorKind::CollaboratorError,
        }
    }
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean '{name}'?)"),
        None => String::new(),
    }
}
