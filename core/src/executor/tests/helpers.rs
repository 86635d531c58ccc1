//! Test helpers for executor tests
//!
//! A recording page driver and selector resolver, plus shortcuts for building
//! actions and executors.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Limits;
use crate::driver::{ElementHandle, MemoryRegistry, PageDriver, SelectorResolver};
use crate::errors::DriverError;
use crate::executor::Executor;
use crate::types::ActionDefinition;

/// One observed driver interaction
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String),
    Locate(String),
    Resolve(JsonValue),
    Click(String),
    Fill(String, String),
    Type(String, String),
    Press(String, String),
    KeyboardPress(String),
    WaitFor(String, String),
    Count(String),
    IsVisible(String),
    Evaluate(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    click_times: Vec<Instant>,
    /// Remaining forced failures per selector
    failures: HashMap<String, usize>,
    missing: HashSet<String>,
    counts: HashMap<String, usize>,
    eval_results: HashMap<String, JsonValue>,
    navigate_delay: Option<Duration>,
}

/// Page driver and selector resolver that record every call
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make interactions with `selector` fail `times` times before succeeding
    pub fn fail_times(&self, selector: &str, times: usize) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(selector.to_string(), times);
        self
    }

    /// Make `selector` impossible to locate
    pub fn missing(&self, selector: &str) -> &Self {
        self.state.lock().unwrap().missing.insert(selector.to_string());
        self
    }

    pub fn set_count(&self, selector: &str, count: usize) -> &Self {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(selector.to_string(), count);
        self
    }

    pub fn set_eval(&self, script: &str, result: JsonValue) -> &Self {
        self.state
            .lock()
            .unwrap()
            .eval_results
            .insert(script.to_string(), result);
        self
    }

    /// Make every navigation take `delay`
    pub fn navigate_delay(&self, delay: Duration) -> &Self {
        self.state.lock().unwrap().navigate_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than locate/resolve lookups
    pub fn actions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Locate(_) | Call::Resolve(_)))
            .collect()
    }

    pub fn click_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().click_times.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn element(&self, selector: String) -> Box<dyn ElementHandle> {
        Box::new(MockElement {
            selector,
            driver: self.clone(),
        })
    }

    /// Consume one forced failure for `selector`, if any are left
    fn forced_failure(&self, selector: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        match state.failures.get_mut(selector) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(DriverError::Failed(format!("{} is detached", selector)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.record(Call::Navigate(url.to_string()));
        let delay = self.state.lock().unwrap().navigate_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn locate(&self, selector: &str) -> Result<Box<dyn ElementHandle>, DriverError> {
        self.record(Call::Locate(selector.to_string()));
        if self.state.lock().unwrap().missing.contains(selector) {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        Ok(self.element(selector.to_string()))
    }

    async fn evaluate(&self, script: &str) -> Result<JsonValue, DriverError> {
        self.record(Call::Evaluate(script.to_string()));
        Ok(self
            .state
            .lock()
            .unwrap()
            .eval_results
            .get(script)
            .cloned()
            .unwrap_or(JsonValue::Null))
    }

    async fn keyboard_press(&self, key: &str) -> Result<(), DriverError> {
        self.record(Call::KeyboardPress(key.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SelectorResolver for MockDriver {
    async fn resolve(
        &self,
        definition: &JsonValue,
        _timeout: Duration,
    ) -> Result<Box<dyn ElementHandle>, DriverError> {
        self.record(Call::Resolve(definition.clone()));
        let css = definition
            .get("css")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| definition.to_string());
        if self.state.lock().unwrap().missing.contains(&css) {
            return Err(DriverError::SelectorNotFound(css));
        }
        Ok(self.element(css))
    }
}

struct MockElement {
    selector: String,
    driver: MockDriver,
}

#[async_trait]
impl ElementHandle for MockElement {
    async fn click(&self) -> Result<(), DriverError> {
        {
            let mut state = self.driver.state.lock().unwrap();
            state.calls.push(Call::Click(self.selector.clone()));
            state.click_times.push(Instant::now());
        }
        self.driver.forced_failure(&self.selector)
    }

    async fn fill(&self, value: &str) -> Result<(), DriverError> {
        self.driver
            .record(Call::Fill(self.selector.clone(), value.to_string()));
        self.driver.forced_failure(&self.selector)
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        self.driver
            .record(Call::Type(self.selector.clone(), text.to_string()));
        self.driver.forced_failure(&self.selector)
    }

    async fn press(&self, key: &str) -> Result<(), DriverError> {
        self.driver
            .record(Call::Press(self.selector.clone(), key.to_string()));
        self.driver.forced_failure(&self.selector)
    }

    async fn wait_for(&self, state: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.driver
            .record(Call::WaitFor(self.selector.clone(), state.to_string()));
        self.driver.forced_failure(&self.selector)
    }

    async fn count(&self) -> Result<usize, DriverError> {
        self.driver.record(Call::Count(self.selector.clone()));
        Ok(self
            .driver
            .state
            .lock()
            .unwrap()
            .counts
            .get(&self.selector)
            .copied()
            .unwrap_or(0))
    }

    async fn is_visible(&self) -> Result<bool, DriverError> {
        self.driver.record(Call::IsVisible(self.selector.clone()));
        Ok(!self.driver.state.lock().unwrap().missing.contains(&self.selector))
    }
}

/* ===================== Builders ===================== */

/// Parse an action definition from JSON
pub fn action(value: JsonValue) -> ActionDefinition {
    serde_json::from_value(value).expect("invalid action definition")
}

/// Action with just a name and steps
pub fn steps_action(name: &str, steps: JsonValue) -> ActionDefinition {
    action(json!({"name": name, "steps": steps}))
}

pub fn executor(driver: &MockDriver, registry: MemoryRegistry) -> Executor {
    executor_with_limits(driver, registry, Limits::default())
}

pub fn executor_with_limits(
    driver: &MockDriver,
    registry: MemoryRegistry,
    limits: Limits,
) -> Executor {
    Executor::new(
        Arc::new(driver.clone()),
        Arc::new(driver.clone()),
        Arc::new(registry),
    )
    .with_limits(limits)
}
