//! Tests for sequential step execution, conditions, outputs and failures

use super::helpers::{action, executor, executor_with_limits, steps_action, Call, MockDriver};
use crate::config::{ConditionErrorPolicy, Limits};
use crate::driver::MemoryRegistry;
use crate::errors::{ErrorKind, TimeoutScope};
use crate::types::StepKind;
use maplit::hashmap;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/* ===================== Scenarios ===================== */

#[tokio::test]
async fn test_open_then_click() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "checkout",
        json!([
            {"action": "open", "args": {"url": "https://shop.test/cart"}},
            {"action": "click", "args": {"selector": "#submit"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.trace.len(), 2);
    assert!(result.trace.iter().all(|t| t.success && !t.skipped));
    assert_eq!(
        driver.actions(),
        vec![
            Call::Navigate("https://shop.test/cart".to_string()),
            Call::Click("#submit".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_false_condition_skips_step() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "maybe",
        json!([{
            "action": "click",
            "args": {"selector": "#danger"},
            "when": "${params.flag} == true"
        }]),
    );

    let result = exec.execute(&def, json!({"flag": false}), json!({})).await;

    assert!(result.success);
    assert_eq!(result.trace.len(), 1);
    assert!(result.trace[0].success);
    assert!(result.trace[0].skipped);
    assert_eq!(result.trace[0].attempts, 0);
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_verify_against_undefined_output_fails() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = action(json!({
        "name": "submit",
        "steps": [{"action": "click", "args": {"selector": "#send"}}],
        "verify": [{"condition": "steps.result == 'done'", "message": "no confirmation"}]
    }));

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::VerifyFailed("no confirmation".to_string()));
    assert_eq!(error.action, "submit");
    assert_eq!(result.trace.len(), 1);
}

/* ===================== Outputs and Returns ===================== */

#[tokio::test]
async fn test_outputs_feed_later_conditions() {
    let driver = MockDriver::new();
    driver.set_count(".item", 3);
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "paginate",
        json!([
            {"action": "count", "args": {"selector": ".item"}, "output": "n"},
            {"action": "click", "args": {"selector": "#more"}, "when": "steps.n > 2"},
            {"action": "click", "args": {"selector": "#less"}, "when": "steps.n <= 2"}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success);
    assert_eq!(
        driver.actions(),
        vec![Call::Count(".item".to_string()), Call::Click("#more".to_string())]
    );
    assert!(result.trace[2].skipped);
    assert_eq!(result.trace[0].output, Some(json!(3)));
    // Without `returns`, data holds every recorded output
    assert_eq!(result.data, json!({"n": 3}));
}

#[tokio::test]
async fn test_returns_mapping() {
    let driver = MockDriver::new();
    driver.set_count(".row", 3);
    driver.set_eval("document.title", json!("Home"));
    let exec = executor(&driver, MemoryRegistry::new());
    let def = action(json!({
        "name": "summary",
        "steps": [
            {"action": "count", "args": {"selector": ".row"}, "output": "rows"},
            {"action": "eval", "args": {"script": "document.title"}, "output": "title"}
        ],
        "returns": {
            "rows": "${steps.rows}",
            "summary": "${steps.title} (${steps.rows})",
            "meta": "{\"count\": ${steps.rows}}",
            "nested": {"t": "${steps.title}"},
            "fixed": 7
        }
    }));

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        result.data,
        json!({
            "rows": 3,
            "summary": "Home (3)",
            "meta": {"count": 3},
            "nested": {"t": "Home"},
            "fixed": 7
        })
    );
}

/* ===================== Failure Handling ===================== */

#[tokio::test]
async fn test_abort_stops_action() {
    let driver = MockDriver::new();
    driver.missing("#gone");
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "broken",
        json!([
            {"action": "click", "args": {"selector": "#gone"}},
            {"action": "click", "args": {"selector": "#never"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.step, Some(0));
    let ErrorKind::StepFailed { cause } = &error.kind else {
        panic!("expected StepFailed, got {:?}", error.kind);
    };
    assert_eq!(cause.kind, ErrorKind::ElementNotFound("#gone".to_string()));
    assert_eq!(result.trace.len(), 1);
    assert!(!driver.calls().contains(&Call::Locate("#never".to_string())));
}

#[tokio::test]
async fn test_continue_records_failure_and_proceeds() {
    let driver = MockDriver::new();
    driver.missing("#banner-close");
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "tolerant",
        json!([
            {"action": "click", "args": {"selector": "#banner-close"}, "onError": "continue"},
            {"action": "click", "args": {"selector": "#login"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success);
    assert!(!result.trace[0].success);
    assert!(result.trace[0]
        .error
        .as_deref()
        .unwrap()
        .contains("element not found"));
    assert!(result.trace[1].success);
}

#[tokio::test]
async fn test_fallback_runs_every_step_in_order() {
    let driver = MockDriver::new();
    driver.missing("#primary");
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "submit",
        json!([{
            "action": "click",
            "args": {"selector": "#primary"},
            "onError": "fallback",
            "output": "submitted",
            "fallback": [
                {"action": "click", "args": {"selector": "#alternate"}},
                {"action": "press", "args": {"key": "Enter"}},
                {"action": "visible", "args": {"selector": "#done"}}
            ]
        }]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        driver.actions(),
        vec![
            Call::Click("#alternate".to_string()),
            Call::KeyboardPress("Enter".to_string()),
            Call::IsVisible("#done".to_string()),
        ]
    );
    let entry = &result.trace[0];
    assert!(entry.success);
    assert_eq!(entry.nested.len(), 3);
    // The last fallback output becomes the step's output
    assert_eq!(entry.output, Some(json!(true)));
    assert_eq!(result.data, json!({"submitted": true}));
}

#[tokio::test]
async fn test_fallback_failure_fails_step() {
    let driver = MockDriver::new();
    driver.missing("#primary").missing("#alternate");
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "submit",
        json!([{
            "action": "click",
            "args": {"selector": "#primary"},
            "onError": "fallback",
            "fallback": [{"action": "click", "args": {"selector": "#alternate"}}]
        }]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.kind.code(), "STEP_FAILED");
    assert_eq!(error.step, Some(0));
    assert!(!result.trace[0].success);
    assert_eq!(result.trace[0].nested.len(), 1);
}

#[tokio::test]
async fn test_expression_errors_ignore_continue() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "unsafe",
        json!([
            {"action": "open", "args": {"url": "${params.__proto__}"}, "onError": "continue"},
            {"action": "click", "args": {"selector": "#next"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(matches!(error.kind, ErrorKind::Expression(_)));
    assert_eq!(error.offset(), Some(0));
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_max_steps_exceeded_before_limit_index() {
    let driver = MockDriver::new();
    let limits = Limits {
        max_steps: 3,
        ..Limits::default()
    };
    let exec = executor_with_limits(&driver, MemoryRegistry::new(), limits);
    let steps: Vec<_> = (0..5)
        .map(|i| json!({"action": "click", "args": {"selector": format!("#b{}", i)}, "onError": "continue"}))
        .collect();
    let def = steps_action("long", json!(steps));

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::MaxStepsExceeded(3));
    assert_eq!(error.step, Some(3));
    assert_eq!(result.trace.len(), 3);
    assert_eq!(driver.actions().len(), 3);
}

#[tokio::test]
async fn test_missing_required_param_runs_nothing() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = action(json!({
        "name": "search",
        "params": [{"name": "query", "type": "string"}],
        "steps": [{"action": "fill", "args": {"selector": "#q", "value": "${params.query}"}}]
    }));

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    assert!(matches!(result.error.unwrap().kind, ErrorKind::Validation(_)));
    assert!(result.trace.is_empty());
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_param_defaults_are_applied() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = action(json!({
        "name": "search",
        "params": [{"name": "query", "default": "rust"}],
        "steps": [{"action": "type", "args": {"selector": "#q", "text": "${params.query}"}}]
    }));

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success);
    assert_eq!(
        driver.actions(),
        vec![Call::Type("#q".to_string(), "rust".to_string())]
    );
}

/* ===================== Conditions ===================== */

#[tokio::test]
async fn test_condition_error_proceeds_by_default() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "lenient",
        json!([{"action": "click", "args": {"selector": "#go"}, "when": "window.ready"}]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success);
    assert!(!result.trace[0].skipped);
    assert_eq!(driver.actions(), vec![Call::Click("#go".to_string())]);
}

#[tokio::test]
async fn test_condition_error_policy_fail() {
    let driver = MockDriver::new();
    let limits = Limits {
        condition_errors: ConditionErrorPolicy::Fail,
        ..Limits::default()
    };
    let exec = executor_with_limits(&driver, MemoryRegistry::new(), limits);
    let def = steps_action(
        "strict",
        json!([{"action": "click", "args": {"selector": "#go"}, "when": "window.ready"}]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    assert!(matches!(result.error.unwrap().kind, ErrorKind::Expression(_)));
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_condition_error_policy_skip() {
    let driver = MockDriver::new();
    let limits = Limits {
        condition_errors: ConditionErrorPolicy::Skip,
        ..Limits::default()
    };
    let exec = executor_with_limits(&driver, MemoryRegistry::new(), limits);
    let def = steps_action(
        "cautious",
        json!([{"action": "click", "args": {"selector": "#go"}, "when": "(params.a"}]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success);
    assert!(result.trace[0].skipped);
    assert!(driver.calls().is_empty());
}

/* ===================== Step Kinds ===================== */

#[tokio::test]
async fn test_selector_resolution_paths() {
    let driver = MockDriver::new();
    let registry = MemoryRegistry::new()
        .with_selectors("shop", hashmap! {"buy".to_string() => json!({"css": "#buy"})});
    let exec = executor(&driver, registry);
    let def = action(json!({
        "name": "purchase",
        "namespace": "shop",
        "steps": [
            {"action": "click", "args": {"selector": "buy"}},
            {"action": "click", "args": {"selector": {"css": ".obj"}}},
            {"action": "click", "args": {"selector": "{\"css\": \".json\"}"}},
            {"action": "click", "args": {"selector": "${selectors.buy}"}},
            {"action": "click", "args": {"selector": "#plain"}}
        ]
    }));

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        driver.calls(),
        vec![
            Call::Resolve(json!({"css": "#buy"})),
            Call::Click("#buy".to_string()),
            Call::Resolve(json!({"css": ".obj"})),
            Call::Click(".obj".to_string()),
            Call::Resolve(json!({"css": ".json"})),
            Call::Click(".json".to_string()),
            Call::Resolve(json!({"css": "#buy"})),
            Call::Click("#buy".to_string()),
            Call::Locate("#plain".to_string()),
            Call::Click("#plain".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_remaining_step_kinds() {
    let driver = MockDriver::new();
    driver.set_eval("window.items.length", json!(4));
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "kinds",
        json!([
            {"action": "press", "args": {"selector": "#q", "key": "Tab"}},
            {"action": "press", "args": {"key": "Escape"}},
            {"action": "wait", "args": {"selector": "#spinner"}},
            {"action": "wait", "args": {"selector": "#modal", "state": "hidden"}},
            {"action": "wait", "args": {"ms": 5}},
            {"action": "visible", "args": {"selector": "#toast"}, "output": "toast"},
            {"action": "eval", "args": {"script": "window.items.length"}, "output": "items"}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        driver.actions(),
        vec![
            Call::Press("#q".to_string(), "Tab".to_string()),
            Call::KeyboardPress("Escape".to_string()),
            Call::WaitFor("#spinner".to_string(), "visible".to_string()),
            Call::WaitFor("#modal".to_string(), "hidden".to_string()),
            Call::IsVisible("#toast".to_string()),
            Call::Evaluate("window.items.length".to_string()),
        ]
    );
    assert_eq!(result.data, json!({"toast": true, "items": 4}));
}

#[tokio::test]
async fn test_missing_argument_is_a_step_failure() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "incomplete",
        json!([
            {"action": "fill", "args": {"selector": "#q"}, "onError": "continue"},
            {"action": "click", "args": {"selector": "#search"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert!(!result.trace[0].success);
    assert!(result.trace[0]
        .error
        .as_deref()
        .unwrap()
        .contains("fill step requires 'value'"));
    assert!(result.trace[1].success);
    assert_eq!(driver.actions(), vec![Call::Click("#search".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_bad_argument_is_retried_then_aborts() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "odd",
        json!([{"action": "click", "args": {"selector": 42}, "retry": 1, "retryDelay": 10}]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    let ErrorKind::StepFailed { cause } = &error.kind else {
        panic!("expected StepFailed, got {:?}", error.kind);
    };
    assert!(matches!(cause.kind, ErrorKind::InvalidArgument(ref m) if m.contains("selector")));
    assert_eq!(result.trace[0].attempts, 2);
}

#[tokio::test]
async fn test_debug_trace_records_resolved_args() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new()).with_debug_trace(true);
    let def = steps_action(
        "search",
        json!([{"action": "fill", "args": {"selector": "#q", "value": "${params.q}"}}]),
    );

    let result = exec.execute(&def, json!({"q": "rust"}), json!({})).await;

    assert!(result.success);
    assert_eq!(
        result.trace[0].args,
        Some(json!({"selector": "#q", "value": "rust"}))
    );
    assert_eq!(
        driver.actions(),
        vec![Call::Fill("#q".to_string(), "rust".to_string())]
    );
}

#[tokio::test]
async fn test_env_scope_in_args() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "visit",
        json!([{"action": "open", "args": {"url": "https://${env.HOST}/login"}}]),
    );

    let result = exec
        .execute(&def, json!({}), json!({"HOST": "staging.test"}))
        .await;

    assert!(result.success);
    assert_eq!(
        driver.actions(),
        vec![Call::Navigate("https://staging.test/login".to_string())]
    );
}

/* ===================== Timeouts and Cancellation ===================== */

#[tokio::test(start_paused = true)]
async fn test_action_timeout_interrupts_in_flight_step() {
    let driver = MockDriver::new();
    driver.navigate_delay(Duration::from_secs(10));
    let limits = Limits {
        action_timeout_ms: 5_000,
        ..Limits::default()
    };
    let exec = executor_with_limits(&driver, MemoryRegistry::new(), limits);
    let def = steps_action(
        "slow",
        json!([
            {"action": "open", "args": {"url": "https://slow.test"}},
            {"action": "click", "args": {"selector": "#never"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(
        error.kind,
        ErrorKind::Timeout {
            scope: TimeoutScope::Action,
            after_ms: 5_000
        }
    );
    assert_eq!(error.step, Some(0));
    assert_eq!(result.trace.len(), 1);
    assert!(!result.trace[0].success);
    assert_eq!(result.trace[0].attempts, 1);
    assert_eq!(
        driver.actions(),
        vec![Call::Navigate("https://slow.test".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_action_timeout_during_fallback_blames_failing_step() {
    let driver = MockDriver::new();
    driver.missing("#primary");
    driver.navigate_delay(Duration::from_secs(10));
    let limits = Limits {
        action_timeout_ms: 5_000,
        ..Limits::default()
    };
    let exec = executor_with_limits(&driver, MemoryRegistry::new(), limits);
    let def = steps_action(
        "recovering",
        json!([
            {"action": "click", "args": {"selector": "#a"}},
            {"action": "click", "args": {"selector": "#b"}},
            {
                "action": "click",
                "args": {"selector": "#primary"},
                "onError": "fallback",
                "fallback": [{"action": "open", "args": {"url": "https://slow.test"}}]
            }
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(
        error.kind,
        ErrorKind::Timeout {
            scope: TimeoutScope::Action,
            after_ms: 5_000
        }
    );
    assert_eq!(error.step, Some(2));
    let indexes: Vec<usize> = result.trace.iter().map(|t| t.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(result.trace[2].kind, StepKind::Click);
    assert!(!result.trace[2].success);
    assert_eq!(result.trace[2].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_fallback_blames_failing_step() {
    let driver = MockDriver::new();
    driver.missing("#primary");
    driver.navigate_delay(Duration::from_secs(10));
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "recovering",
        json!([
            {"action": "click", "args": {"selector": "#a"}},
            {
                "action": "click",
                "args": {"selector": "#primary"},
                "onError": "fallback",
                "fallback": [
                    {"action": "click", "args": {"selector": "#backup"}},
                    {"action": "open", "args": {"url": "https://slow.test"}}
                ]
            }
        ]),
    );

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = exec
        .execute_with_cancel(&def, json!({}), json!({}), token)
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.step, Some(1));
    assert_eq!(result.trace.len(), 2);
    assert_eq!(result.trace[1].index, 1);
    assert_eq!(result.trace[1].kind, StepKind::Click);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_is_recoverable() {
    let driver = MockDriver::new();
    driver.navigate_delay(Duration::from_secs(10));
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "impatient",
        json!([
            {"action": "open", "args": {"url": "https://slow.test"}, "timeout": 1000, "onError": "continue"},
            {"action": "click", "args": {"selector": "#next"}}
        ]),
    );

    let result = exec.execute(&def, json!({}), json!({})).await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.trace[0]
        .error
        .as_deref()
        .unwrap()
        .contains("step timed out after 1000ms"));
    assert!(result.trace[1].success);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_step() {
    let driver = MockDriver::new();
    driver.navigate_delay(Duration::from_secs(10));
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "cancellable",
        json!([{"action": "open", "args": {"url": "https://slow.test"}}]),
    );

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = exec
        .execute_with_cancel(&def, json!({}), json!({}), token)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(result.trace.len(), 1);
    assert!(!result.trace[0].success);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let driver = MockDriver::new();
    let exec = executor(&driver, MemoryRegistry::new());
    let def = steps_action(
        "never",
        json!([{"action": "click", "args": {"selector": "#go"}}]),
    );
    let token = CancellationToken::new();
    token.cancel();

    let result = exec
        .execute_with_cancel(&def, json!({}), json!({}), token)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(driver.calls().is_empty());
}
