pub mod error;
pub mod functions;
pub mod call_syntax;
pub mod registry;
pub mod backends;
pub mod session;
pub mod engine;
pub mod checker;
pub mod protocol;
pub mod runner;

pub use error::{ErrorKind, RunnerError};
pub use functions::{
    json_schema_for, ArgumentValidator, CallDescriptor, FunctionCall, FunctionDefinition,
    FunctionParameter, FunctionParameters,
};
pub use call_syntax::parse_call;
pub use registry::{Registry, RegistryEntry};
pub use backends::{Backend, BackendCatalog, BoxedBackend, GorillaFileSystem, MathApi, TicketApi};
pub use session::{InstanceSet, RunPhase, SessionInstances, SessionKey, SessionStore};
pub use engine::{BackendEngine, ExecutionBatch, ExecutionEngine};
pub use checker::{CheckRequest, CheckVerdict, Checker, MultiTurnChecker, TestEntry};
pub use protocol::{parse_line, Action, ExecuteRequest, Request, ResetRequest, Response, ResponseBody};
pub use runner::{RunnerStats, SessionRunner};
