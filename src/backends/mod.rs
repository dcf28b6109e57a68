use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::functions::FunctionDefinition;
use crate::registry::{RegistryEntry, BACKEND_PATH_PREFIX};
use crate::RunnerError;

pub mod file_system;
pub mod math;
pub mod ticket;

pub use file_system::GorillaFileSystem;
pub use math::MathApi;
pub use ticket::TicketApi;

/// A simulated API surface whose public functions are callable from a
/// transcript.
pub trait Backend: Send {
    fn class_name(&self) -> &'static str;

    fn functions(&self) -> &'static [FunctionDefinition];

    /// Seeds state from the class's slice of `initial_config`.
    fn load_scenario(&mut self, config: &Value, long_context: bool) -> Result<(), RunnerError>;

    /// `arguments` is always a JSON object already validated against the
    /// function's parameter schema.
    fn invoke(&mut self, function: &str, arguments: &Value) -> Result<Value, RunnerError>;

    /// Snapshot of the state compared by the checker. `Null` for stateless
    /// backends.
    fn state(&self) -> Value;
}

pub type BoxedBackend = Box<dyn Backend>;

type Constructor = fn() -> BoxedBackend;

/// Maps a registry entry's module path to the code implementing it.
#[derive(Clone)]
pub struct BackendCatalog {
    constructors: BTreeMap<String, Constructor>,
}

impl BackendCatalog {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(
            format!("{BACKEND_PATH_PREFIX}.gorilla_file_system"),
            || Box::new(GorillaFileSystem::new()),
        );
        catalog.register(format!("{BACKEND_PATH_PREFIX}.math_api"), || {
            Box::new(MathApi::new())
        });
        catalog.register(format!("{BACKEND_PATH_PREFIX}.ticket_api"), || {
            Box::new(TicketApi::new())
        });
        catalog
    }

    pub fn register(&mut self, module_path: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(module_path.into(), constructor);
    }

    pub fn supports(&self, entry: &RegistryEntry) -> bool {
        self.constructors.contains_key(&entry.module_path)
    }

    pub fn construct(&self, entry: &RegistryEntry) -> Result<BoxedBackend, RunnerError> {
        let constructor = self.constructors.get(&entry.module_path).ok_or_else(|| {
            RunnerError::MissingImplementation {
                class: entry.api_name.clone(),
                module_path: entry.module_path.clone(),
            }
        })?;
        Ok(constructor())
    }
}

impl Default for BackendCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn parse_args<T: DeserializeOwned>(
    function: &str,
    arguments: &Value,
) -> Result<T, RunnerError> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| RunnerError::InvalidFunctionArguments(format!("{function}: {e}")))
}

pub(crate) fn unknown_function(class: &str, function: &str) -> RunnerError {
    RunnerError::UnknownFunction(format!("{class}.{function}"))
}

pub(crate) fn parse_scenario<T: DeserializeOwned + Default>(
    class: &str,
    config: &Value,
) -> Result<T, RunnerError> {
    match config {
        Value::Null => Ok(T::default()),
        Value::Object(map) if map.is_empty() => Ok(T::default()),
        other => serde_json::from_value(other.clone()).map_err(|e| RunnerError::ScenarioLoad {
            class: class.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn builtin_catalog_covers_reference_backends_only() {
        let catalog = BackendCatalog::builtin();
        let registry = Registry::builtin();

        for name in ["GorillaFileSystem", "MathAPI", "TicketAPI"] {
            let entry = registry.lookup(name).unwrap();
            let backend = catalog.construct(entry).unwrap();
            assert_eq!(backend.class_name(), name);
            assert!(!backend.functions().is_empty());
        }

        let trading = registry.lookup("TradingBot").unwrap();
        assert!(!catalog.supports(trading));
        assert!(matches!(
            catalog.construct(trading),
            Err(RunnerError::MissingImplementation { .. })
        ));
    }
}
