use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{json, Map, Value};

use crate::backends::{BackendCatalog, BoxedBackend};
use crate::functions::{ArgumentValidator, CallDescriptor, FunctionDefinition};
use crate::registry::{Registry, RegistryEntry};
use crate::session::{InstanceSet, RunPhase, SessionKey};
use crate::RunnerError;

/// Function names rejected before dispatch.
pub const DISALLOWED_FUNCTIONS: &[&str] =
    &["kill", "exit", "quit", "remove", "unlink", "popen", "Popen", "run"];

pub const EXECUTION_ERROR_PREFIX: &str = "Error during execution: ";

/// Everything the engine needs to apply one call list.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBatch<'a> {
    pub calls: &'a [CallDescriptor],
    pub initial_config: &'a Map<String, Value>,
    pub involved_classes: &'a [String],
    pub session: &'a SessionKey,
    pub phase: RunPhase,
    pub long_context: bool,
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Applies `batch.calls` in order against `instances`, creating any
    /// missing stateful instance first. Returns one result string per call.
    ///
    /// Resolution and scenario-load failures abort before `instances` is
    /// modified; failures of individual calls are reported in their result
    /// slot instead.
    async fn execute(
        &self,
        batch: ExecutionBatch<'_>,
        instances: &mut InstanceSet,
    ) -> Result<Vec<String>, RunnerError>;
}

pub struct BackendEngine {
    registry: Arc<Registry>,
    catalog: BackendCatalog,
    validators: Mutex<HashMap<String, Arc<ArgumentValidator>>>,
}

struct Route {
    class_name: String,
    definition: &'static FunctionDefinition,
}

impl BackendEngine {
    pub fn new(registry: Arc<Registry>, catalog: BackendCatalog) -> Self {
        Self {
            registry,
            catalog,
            validators: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_builtin_backends(registry: Arc<Registry>) -> Self {
        Self::new(registry, BackendCatalog::builtin())
    }

    fn resolve(&self, involved_classes: &[String]) -> Result<Vec<&RegistryEntry>, RunnerError> {
        let mut resolved = Vec::with_capacity(involved_classes.len());
        for class_name in involved_classes {
            let entry = self.registry.lookup(class_name)?;
            if !self.catalog.supports(entry) {
                return Err(RunnerError::MissingImplementation {
                    class: entry.api_name.clone(),
                    module_path: entry.module_path.clone(),
                });
            }
            resolved.push(entry);
        }
        Ok(resolved)
    }

    fn validator(
        &self,
        class_name: &str,
        definition: &FunctionDefinition,
    ) -> Result<Arc<ArgumentValidator>, RunnerError> {
        let key = format!("{class_name}.{}", definition.name);
        let mut cache = self
            .validators
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(validator) = cache.get(&key) {
            return Ok(Arc::clone(validator));
        }
        let validator = Arc::new(definition.validator()?);
        cache.insert(key, Arc::clone(&validator));
        Ok(validator)
    }

    fn apply(
        &self,
        descriptor: &CallDescriptor,
        routes: &BTreeMap<String, Route>,
        instances: &mut InstanceSet,
        transient: &mut BTreeMap<String, BoxedBackend>,
    ) -> Result<Value, RunnerError> {
        let call = descriptor.to_call()?;
        if DISALLOWED_FUNCTIONS.contains(&call.name.as_str()) {
            return Err(RunnerError::DisallowedFunction(call.name));
        }

        let route = routes
            .get(&call.name)
            .ok_or_else(|| RunnerError::UnknownFunction(call.name.clone()))?;
        let arguments = route.definition.bind(&call)?;
        self.validator(&route.class_name, route.definition)?
            .validate(&arguments)?;

        let backend = match transient.get_mut(&route.class_name) {
            Some(backend) => backend,
            None => instances
                .get_mut(&route.class_name)
                .ok_or_else(|| RunnerError::UnknownFunction(call.name.clone()))?,
        };
        backend.invoke(&call.name, &arguments)
    }
}

#[async_trait]
impl ExecutionEngine for BackendEngine {
    async fn execute(
        &self,
        batch: ExecutionBatch<'_>,
        instances: &mut InstanceSet,
    ) -> Result<Vec<String>, RunnerError> {
        let resolved = self.resolve(batch.involved_classes)?;

        let mut staged: BTreeMap<String, BoxedBackend> = BTreeMap::new();
        let mut transient: BTreeMap<String, BoxedBackend> = BTreeMap::new();
        for entry in &resolved {
            if entry.stateless {
                transient.insert(entry.api_name.clone(), self.catalog.construct(entry)?);
                continue;
            }
            if instances.contains(&entry.api_name) || staged.contains_key(&entry.api_name) {
                continue;
            }
            let mut backend = self.catalog.construct(entry)?;
            let config = batch
                .initial_config
                .get(&entry.api_name)
                .cloned()
                .unwrap_or_else(|| json!({}));
            backend.load_scenario(&config, batch.long_context)?;
            staged.insert(entry.api_name.clone(), backend);
        }

        if !staged.is_empty() {
            tracing::debug!(
                session = %batch.session,
                phase = %batch.phase,
                classes = ?staged.keys().collect::<Vec<_>>(),
                "instantiated backend classes"
            );
        }
        for (class_name, backend) in staged {
            instances.insert(class_name, backend);
        }

        let mut routes: BTreeMap<String, Route> = BTreeMap::new();
        for entry in &resolved {
            let functions = match transient.get(&entry.api_name) {
                Some(backend) => backend.functions(),
                None => match instances.get(&entry.api_name) {
                    Some(backend) => backend.functions(),
                    None => continue,
                },
            };
            for definition in functions {
                routes.insert(
                    definition.name.clone(),
                    Route {
                        class_name: entry.api_name.clone(),
                        definition,
                    },
                );
            }
        }

        let mut results = Vec::with_capacity(batch.calls.len());
        for descriptor in batch.calls {
            let result = match self.apply(descriptor, &routes, instances, &mut transient) {
                Ok(value) => render_result(&value)?,
                Err(error @ RunnerError::DisallowedFunction(_)) => error.to_string(),
                Err(error) => {
                    tracing::debug!(session = %batch.session, call = ?descriptor, %error, "call failed");
                    format!("{EXECUTION_ERROR_PREFIX}{error}")
                }
            };
            results.push(result);
        }
        Ok(results)
    }
}

/// Stringifies a call result: strings pass through, `null` and booleans use
/// the `None` / `True` / `False` spelling, everything else is ASCII-only JSON
/// with `", "` and `": "` separators.
pub fn render_result(value: &Value) -> Result<String, RunnerError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Null => Ok("None".to_string()),
        Value::Bool(flag) => Ok(if *flag { "True" } else { "False" }.to_string()),
        Value::Number(number) => Ok(number.to_string()),
        other => {
            let mut buffer = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
            other.serialize(&mut serializer)?;
            String::from_utf8(buffer).map_err(|e| RunnerError::Parse(e.to_string()))
        }
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    /// Non-ASCII characters are written as `\uXXXX` UTF-16 escapes.
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..index].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> BackendEngine {
        BackendEngine::with_builtin_backends(Arc::new(Registry::builtin().clone()))
    }

    fn calls(list: &[&str]) -> Vec<CallDescriptor> {
        list.iter().map(|text| CallDescriptor::from(*text)).collect()
    }

    fn fs_config() -> Map<String, Value> {
        let value = json!({
            "GorillaFileSystem": {
                "root": {"home": {"type": "directory", "contents": {
                    "readme.md": {"type": "file", "content": "hello"}
                }}}
            }
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    async fn run(
        engine: &BackendEngine,
        list: &[&str],
        classes: &[&str],
        instances: &mut InstanceSet,
    ) -> Result<Vec<String>, RunnerError> {
        let descriptors = calls(list);
        let config = fs_config();
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        let session = SessionKey::new("model", "multi_turn_base_0");
        engine
            .execute(
                ExecutionBatch {
                    calls: &descriptors,
                    initial_config: &config,
                    involved_classes: &classes,
                    session: &session,
                    phase: RunPhase::Inference,
                    long_context: false,
                },
                instances,
            )
            .await
    }

    #[tokio::test]
    async fn applies_calls_in_order_with_shared_state() {
        let engine = engine();
        let mut instances = InstanceSet::new();

        let results = run(
            &engine,
            &[
                "cat(file_name='readme.md')",
                "mkdir(dir_name='src')",
                "cd(folder='src')",
                "pwd()",
                "add(a=1, b=2)",
            ],
            &["GorillaFileSystem", "MathAPI"],
            &mut instances,
        )
        .await
        .unwrap();

        assert_eq!(
            results,
            vec![
                r#"{"file_content": "hello"}"#.to_string(),
                "None".to_string(),
                r#"{"current_working_directory": "/home/src"}"#.to_string(),
                r#"{"current_working_directory": "/home/src"}"#.to_string(),
                r#"{"result": 3.0}"#.to_string(),
            ]
        );
        assert_eq!(instances.class_names().collect::<Vec<_>>(), vec!["GorillaFileSystem"]);
    }

    #[tokio::test]
    async fn per_call_failures_do_not_abort_the_list() {
        let engine = engine();
        let mut instances = InstanceSet::new();

        let results = run(
            &engine,
            &[
                "teleport(to='mars')",
                "cd(folder=)",
                "exit()",
                "cat(file_name=3)",
                "touch(file_name='a.txt')",
            ],
            &["GorillaFileSystem"],
            &mut instances,
        )
        .await
        .unwrap();

        assert!(results[0].starts_with(EXECUTION_ERROR_PREFIX));
        assert!(results[0].contains("teleport"));
        assert!(results[1].starts_with("Error during execution: invalid call syntax"));
        assert_eq!(results[2], "Function call exit is not allowed.");
        assert!(results[3].starts_with("Error during execution: invalid function arguments"));
        assert_eq!(results[4], "None");
    }

    #[tokio::test]
    async fn unresolved_class_leaves_instances_untouched() {
        let engine = engine();
        let mut instances = InstanceSet::new();

        let error = run(
            &engine,
            &["pwd()"],
            &["GorillaFileSystem", "NoSuchAPI"],
            &mut instances,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, RunnerError::UnknownBackend { .. }));
        assert!(instances.is_empty());

        let error = run(&engine, &["pwd()"], &["TradingBot"], &mut instances)
            .await
            .unwrap_err();
        assert!(matches!(error, RunnerError::MissingImplementation { .. }));
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn cached_instances_are_not_reseeded() {
        let engine = engine();
        let mut instances = InstanceSet::new();

        run(&engine, &["echo(content='changed', file_name='readme.md')"], &["GorillaFileSystem"], &mut instances)
            .await
            .unwrap();
        let results = run(&engine, &["cat(file_name='readme.md')"], &["GorillaFileSystem"], &mut instances)
            .await
            .unwrap();
        assert_eq!(results, vec![r#"{"file_content": "changed"}"#.to_string()]);
    }

    #[test]
    fn render_result_matches_python_spelling() {
        assert_eq!(render_result(&json!("plain")).unwrap(), "plain");
        assert_eq!(render_result(&Value::Null).unwrap(), "None");
        assert_eq!(render_result(&json!(true)).unwrap(), "True");
        assert_eq!(
            render_result(&json!({"a": [1, 2], "b": {"c": null}})).unwrap(),
            r#"{"a": [1, 2], "b": {"c": null}}"#
        );
    }

    #[test]
    fn render_result_escapes_non_ascii() {
        assert_eq!(
            render_result(&json!({"terminal_output": "caf\u{e9} \u{1F600}"})).unwrap(),
            r#"{"terminal_output": "caf\u00e9 \ud83d\ude00"}"#
        );
        assert_eq!(render_result(&json!("caf\u{e9}")).unwrap(), "caf\u{e9}");
    }
}
