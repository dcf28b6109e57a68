use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::backends::{Backend, BoxedBackend};

/// Identifies the cached backend state of one evaluation run of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub model_name: String,
    pub test_entry_id: String,
}

impl SessionKey {
    pub fn new(model_name: impl Into<String>, test_entry_id: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            test_entry_id: test_entry_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_name, self.test_entry_id)
    }
}

/// Inference calls and evaluation replays never share instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Inference,
    Evaluation,
}

impl RunPhase {
    pub fn from_eval_flag(is_eval_run: bool) -> Self {
        if is_eval_run {
            RunPhase::Evaluation
        } else {
            RunPhase::Inference
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Inference => write!(f, "inference"),
            RunPhase::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Live backend objects keyed by class name.
#[derive(Default)]
pub struct InstanceSet {
    instances: BTreeMap<String, BoxedBackend>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.instances.contains_key(class_name)
    }

    pub fn get(&self, class_name: &str) -> Option<&dyn Backend> {
        self.instances.get(class_name).map(|backend| backend.as_ref())
    }

    pub fn get_mut(&mut self, class_name: &str) -> Option<&mut BoxedBackend> {
        self.instances.get_mut(class_name)
    }

    pub fn insert(&mut self, class_name: impl Into<String>, backend: BoxedBackend) {
        self.instances.insert(class_name.into(), backend);
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// State snapshot per class, as compared by the checker.
    pub fn states(&self) -> Map<String, Value> {
        self.instances
            .iter()
            .map(|(name, backend)| (name.clone(), backend.state()))
            .collect()
    }
}

impl fmt::Debug for InstanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.instances.keys()).finish()
    }
}

#[derive(Debug)]
pub struct SessionInstances {
    inference: InstanceSet,
    evaluation: InstanceSet,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl SessionInstances {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            inference: InstanceSet::new(),
            evaluation: InstanceSet::new(),
            created_at: now,
            last_used: now,
        }
    }

    pub fn phase(&self, phase: RunPhase) -> &InstanceSet {
        match phase {
            RunPhase::Inference => &self.inference,
            RunPhase::Evaluation => &self.evaluation,
        }
    }

    pub fn phase_mut(&mut self, phase: RunPhase) -> &mut InstanceSet {
        self.last_used = Utc::now();
        match phase {
            RunPhase::Inference => &mut self.inference,
            RunPhase::Evaluation => &mut self.evaluation,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inference.is_empty() && self.evaluation.is_empty()
    }
}

/// Owned mapping from session key to its cached instances. Entries live
/// until removed; there is no eviction.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionKey, SessionInstances>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session and whether it was created by this call.
    pub fn get_or_create(&mut self, key: &SessionKey) -> (&mut SessionInstances, bool) {
        let created = !self.sessions.contains_key(key);
        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(SessionInstances::new);
        (session, created)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&SessionInstances> {
        self.sessions.get(key)
    }

    pub fn remove(&mut self, key: &SessionKey) -> Option<SessionInstances> {
        self.sessions.remove(key)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SessionKey> {
        self.sessions.keys()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
