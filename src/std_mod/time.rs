use std::time::{SystemTime, UNIX_EPOCH};

use crate::objects::object::NativeObject;
use crate::value::{make_number_value, Value};

/// `clock()` returns wall-clock seconds as a double.
pub struct Clock;

impl NativeObject for Clock {
    fn invoke(&self, _args: &[Value]) -> Result<Value, String> {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|error| error.to_string())?;
        Ok(make_number_value(duration.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, is_number};

    #[test]
    fn test_clock_returns_positive_seconds() {
        let result = Clock.invoke(&[]).expect("clock should not fail");
        assert!(is_number(&result));
        assert!(as_number(&result) > 0.0);
    }

    #[test]
    fn test_clock_is_monotonic_enough() {
        let first = as_number(&Clock.invoke(&[]).unwrap());
        let second = as_number(&Clock.invoke(&[]).unwrap());
        assert!(second >= first);
    }
}
