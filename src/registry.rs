use std::{collections::BTreeMap, fs, path::Path};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::RunnerError;

pub const BACKEND_PATH_PREFIX: &str = "bfcl_eval.eval_checker.multi_turn_eval.func_source_code";

static RE_API_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let classes = [
        ("GorillaFileSystem", "gorilla_file_system.json", "gorilla_file_system", false),
        ("MathAPI", "math_api.json", "math_api", true),
        ("MessageAPI", "message_api.json", "message_api", false),
        ("TwitterAPI", "posting_api.json", "posting_api", false),
        ("TicketAPI", "ticket_api.json", "ticket_api", false),
        ("TradingBot", "trading_bot.json", "trading_bot", false),
        ("TravelAPI", "travel_booking.json", "travel_booking", false),
        ("VehicleControlAPI", "vehicle_control.json", "vehicle_control", false),
    ];

    let entries = classes
        .into_iter()
        .map(|(api_name, doc_file, module, stateless)| RegistryEntry {
            api_name: api_name.to_string(),
            doc_file: doc_file.to_string(),
            module_path: format!("{BACKEND_PATH_PREFIX}.{module}"),
            stateless,
            log_omitted: false,
        })
        .map(|entry| (entry.api_name.clone(), entry))
        .collect();

    Registry { entries }
});

/// Static description of one backend class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub api_name: String,
    pub doc_file: String,
    pub module_path: String,
    /// No state carries over between calls; never cached.
    #[serde(default)]
    pub stateless: bool,
    /// State is reported out-of-band instead of inline in inference logs.
    #[serde(default)]
    pub log_omitted: bool,
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    backends: Vec<RegistryEntry>,
}

/// Read-only mapping from API name to its registry entry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// The eight backend classes shipped with the benchmark.
    pub fn builtin() -> &'static Registry {
        &DEFAULT_REGISTRY
    }

    pub fn from_entries<I>(entries: I) -> Result<Self, RunnerError>
    where
        I: IntoIterator<Item = RegistryEntry>,
    {
        let mut map = BTreeMap::new();
        for entry in entries {
            if !RE_API_NAME.is_match(&entry.api_name) {
                return Err(RunnerError::Registry(format!(
                    "invalid api name '{}'",
                    entry.api_name
                )));
            }
            if map.contains_key(&entry.api_name) {
                return Err(RunnerError::Registry(format!(
                    "duplicate api name '{}'",
                    entry.api_name
                )));
            }
            map.insert(entry.api_name.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, RunnerError> {
        let document: RegistryDocument =
            serde_yaml::from_str(source).map_err(|e| RunnerError::Registry(e.to_string()))?;
        Self::from_entries(document.backends)
    }

    pub fn from_json_str(source: &str) -> Result<Self, RunnerError> {
        let document: RegistryDocument =
            serde_json::from_str(source).map_err(|e| RunnerError::Registry(e.to_string()))?;
        Self::from_entries(document.backends)
    }

    /// Loads a registry file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        if ext == "json" {
            Self::from_json_str(&source)
        } else {
            Self::from_yaml_str(&source)
        }
    }

    pub fn get(&self, api_name: &str) -> Option<&RegistryEntry> {
        self.entries.get(api_name)
    }

    pub fn lookup(&self, api_name: &str) -> Result<&RegistryEntry, RunnerError> {
        self.get(api_name).ok_or_else(|| RunnerError::UnknownBackend {
            name: api_name.to_string(),
            suggestion: self.closest_name(api_name),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn stateless_classes(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .filter(|entry| entry.stateless)
            .map(|entry| entry.api_name.as_str())
    }

    pub fn log_omitted_classes(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .filter(|entry| entry.log_omitted)
            .map(|entry| entry.api_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn closest_name(&self, want: &str) -> Option<String> {
        let want = want.to_lowercase();
        let mut best: Option<(&String, usize)> = None;
        for name in self.entries.keys() {
            let d = strsim::levenshtein(&want, &name.to_lowercase());
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((name, d));
            }
        }
        best.filter(|(_, dist)| *dist <= 3).map(|(name, _)| name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_matches_backend_config() {
        let registry = Registry::builtin();
        assert_eq!(registry.len(), 8);

        let fs = registry.lookup("GorillaFileSystem").unwrap();
        assert_eq!(fs.doc_file, "gorilla_file_system.json");
        assert_eq!(
            fs.module_path,
            "bfcl_eval.eval_checker.multi_turn_eval.func_source_code.gorilla_file_system"
        );

        let twitter = registry.lookup("TwitterAPI").unwrap();
        assert_eq!(twitter.doc_file, "posting_api.json");

        assert_eq!(registry.stateless_classes().collect::<Vec<_>>(), vec!["MathAPI"]);
        assert_eq!(registry.log_omitted_classes().count(), 0);
    }

    #[test]
    fn unknown_name_suggests_close_match() {
        let error = Registry::builtin().lookup("TicketApi").unwrap_err();
        match error {
            RunnerError::UnknownBackend { name, suggestion } => {
                assert_eq!(name, "TicketApi");
                assert_eq!(suggestion.as_deref(), Some("TicketAPI"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let error = Registry::builtin().lookup("NoSuchAPI").unwrap_err();
        assert!(matches!(error, RunnerError::UnknownBackend { suggestion: None, .. }));
    }

    #[test]
    fn yaml_registry_rejects_duplicates() {
        let yaml = r#"
backends:
  - api_name: MathAPI
    doc_file: math_api.json
    module_path: local.math
    stateless: true
  - api_name: MathAPI
    doc_file: math_api.json
    module_path: local.math
"#;
        let error = Registry::from_yaml_str(yaml).unwrap_err();
        assert!(error.to_string().contains("duplicate api name 'MathAPI'"));
    }

    #[test]
    fn json_registry_defaults_flags() {
        let json = r#"{"backends": [{"api_name": "TicketAPI", "doc_file": "ticket_api.json", "module_path": "x.ticket_api"}]}"#;
        let registry = Registry::from_json_str(json).unwrap();
        let entry = registry.lookup("TicketAPI").unwrap();
        assert!(!entry.stateless);
        assert!(!entry.log_omitted);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["TicketAPI"]);
    }
}
