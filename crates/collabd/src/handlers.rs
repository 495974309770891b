//! Built-in task handlers registered by the daemon.

use std::collections::HashMap;

use collab_core::Value;
use collab_scheduler::HandlerRegistry;
use serde_json::json;

/// Register `echo` and `sum`.
pub fn register_builtins(registry: &HandlerRegistry) {
    registry.register("echo", echo);
    registry.register("sum", sum);
}

/// Copy every source value into the result.
fn echo(source: &[Value], result: &mut Vec<Value>, _context: &mut HashMap<String, Value>) -> bool {
    result.extend(source.iter().cloned());
    true
}

/// Push the numeric sum of the source. Integer inputs stay integral
/// unless the sum overflows; any non-numeric value fails the task.
fn sum(source: &[Value], result: &mut Vec<Value>, _context: &mut HashMap<String, Value>) -> bool {
    if !source.iter().all(Value::is_number) {
        return false;
    }

    let integral = source
        .iter()
        .try_fold(0i64, |acc, v| acc.checked_add(v.as_i64()?));
    match integral {
        Some(total) => result.push(json!(total)),
        None => {
            let total: f64 = source.iter().filter_map(Value::as_f64).sum();
            result.push(json!(total));
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, source: Vec<Value>) -> (bool, Vec<Value>) {
        let registry = HandlerRegistry::new();
        register_builtins(&registry);
        let handler = registry.lookup(name).unwrap();
        let mut result = Vec::new();
        let ok = handler(&source, &mut result, &mut HashMap::new());
        (ok, result)
    }

    #[test]
    fn echo_copies_source() {
        let (ok, result) = run("echo", vec![json!("a"), json!({"k": 1})]);
        assert!(ok);
        assert_eq!(result, vec![json!("a"), json!({"k": 1})]);
    }

    #[test]
    fn sum_of_integers_stays_integral() {
        let (ok, result) = run("sum", vec![json!(1), json!(2), json!(39)]);
        assert!(ok);
        assert_eq!(result, vec![json!(42)]);
    }

    #[test]
    fn sum_mixes_floats() {
        let (ok, result) = run("sum", vec![json!(1), json!(0.5)]);
        assert!(ok);
        assert_eq!(result, vec![json!(1.5)]);
    }

    #[test]
    fn sum_rejects_non_numbers() {
        let (ok, result) = run("sum", vec![json!(1), json!("two")]);
        assert!(!ok);
        assert!(result.is_empty());
    }

    #[test]
    fn sum_of_nothing_is_zero() {
        let (ok, result) = run("sum", vec![]);
        assert!(ok);
        assert_eq!(result, vec![json!(0)]);
    }
}
