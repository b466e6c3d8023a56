use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::interpreter::value::{NativeFunction, Value};

/// The whole native surface: one global `clock` binding.
pub fn all_native_functions() -> Vec<(&'static str, Value)> {
    vec![("clock", native_clock())]
}

fn native_clock() -> Value {
    Value::NativeFn(Rc::new(NativeFunction {
        name: Rc::from("clock"),
        arity: 0,
        func: |_args| {
            let elapsed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| format!("clock: {}", e))?;
            Ok(Value::Num(elapsed.as_secs_f64()))
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_returns_seconds_as_a_number() {
        let (name, value) = all_native_functions().remove(0);
        assert_eq!(name, "clock");
        let Value::NativeFn(clock) = value else {
            panic!("clock is not a native function");
        };
        assert_eq!(clock.arity, 0);
        match (clock.func)(&[]) {
            Ok(Value::Num(seconds)) => assert!(seconds > 0.0),
            other => panic!("unexpected clock result: {:?}", other),
        }
    }
}
