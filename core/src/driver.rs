//! Collaborator contracts supplied by the embedding application
//!
//! The executor only talks to a page through [`PageDriver`] and
//! [`ElementHandle`], to structured selectors through [`SelectorResolver`],
//! and to other actions through [`ActionRegistry`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::DriverError;
use crate::types::ActionDefinition;

/// A located element (or set of elements)
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn click(&self) -> Result<(), DriverError>;
    async fn fill(&self, value: &str) -> Result<(), DriverError>;
    async fn type_text(&self, text: &str) -> Result<(), DriverError>;
    async fn press(&self, key: &str) -> Result<(), DriverError>;
    /// Wait until the element reaches `state` (`visible`, `hidden`, `attached`, `detached`)
    async fn wait_for(&self, state: &str, timeout: Duration) -> Result<(), DriverError>;
    async fn count(&self) -> Result<usize, DriverError>;
    async fn is_visible(&self) -> Result<bool, DriverError>;
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;
    /// Locate by a plain selector string
    async fn locate(&self, selector: &str) -> Result<Box<dyn ElementHandle>, DriverError>;
    async fn evaluate(&self, script: &str) -> Result<JsonValue, DriverError>;
    async fn keyboard_press(&self, key: &str) -> Result<(), DriverError>;
}

/// Resolves structured selector definitions, trying their alternatives in order
#[async_trait]
pub trait SelectorResolver: Send + Sync {
    async fn resolve(
        &self,
        definition: &JsonValue,
        timeout: Duration,
    ) -> Result<Box<dyn ElementHandle>, DriverError>;
}

/* ===================== Registry ===================== */

pub trait ActionRegistry: Send + Sync {
    /// Find an action by its fully-qualified name
    fn lookup(&self, full_name: &str) -> Option<Arc<ActionDefinition>>;

    /// Named selectors visible to `action` through the `selectors` scope
    fn selectors(&self, _action: &ActionDefinition) -> HashMap<String, JsonValue> {
        HashMap::new()
    }
}

/// In-memory registry keyed by full name, with selectors per namespace
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    actions: HashMap<String, Arc<ActionDefinition>>,
    selectors: HashMap<String, HashMap<String, JsonValue>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, replacing any previous one with the same full name
    pub fn register(&mut self, action: ActionDefinition) -> Arc<ActionDefinition> {
        let action = Arc::new(action);
        self.actions.insert(action.full_name(), Arc::clone(&action));
        action
    }

    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.register(action);
        self
    }

    /// Named selectors for every action in `namespace`
    pub fn with_selectors(
        mut self,
        namespace: impl Into<String>,
        selectors: HashMap<String, JsonValue>,
    ) -> Self {
        self.selectors
            .entry(namespace.into())
            .or_default()
            .extend(selectors);
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered full names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ActionRegistry for MemoryRegistry {
    fn lookup(&self, full_name: &str) -> Option<Arc<ActionDefinition>> {
        self.actions.get(full_name).cloned()
    }

    fn selectors(&self, action: &ActionDefinition) -> HashMap<String, JsonValue> {
        self.selectors
            .get(&action.namespace)
            .cloned()
            .unwrap_or_default()
    }
}
