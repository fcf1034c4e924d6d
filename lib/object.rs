use core::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ValueKind {
    Number,
    Text,
    Boolean,
}

#[derive(Debug, PartialEq, Clone)]
pub enum OpError {
    TypeMismatch(String),
    Runtime(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Text(_) => ValueKind::Text,
            Value::Boolean(_) => ValueKind::Boolean,
        }
    }

    /// Booleans are themselves, numbers are true when non-zero. Text has no truth value.
    pub fn truthy(&self) -> Result<bool, OpError> {
        match self {
            Value::Boolean(value) => Ok(*value),
            Value::Number(value) => Ok(*value != 0.0),
            Value::Text(_) => Err(OpError::TypeMismatch(format!(
                "{} has no truth value",
                self.describe()
            ))),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Value::Number(value) => format!("number {}", format_number(*value)),
            Value::Text(value) => format!("string {:?}", value),
            Value::Boolean(value) => format!("boolean {}", value),
        }
    }
}

impl ValueKind {
    /// The value an unknown symbol reads as when a kind is requested.
    pub fn sentinel(self) -> Value {
        match self {
            ValueKind::Number => Value::Number(0.0),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::Boolean => Value::Boolean(false),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        ValueKind::Number.sentinel()
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Number(value) => write!(f, "{}", format_number(*value)),
            Value::Text(value) => write!(f, "{}", value),
            Value::Boolean(value) => write!(f, "{}", value),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValueKind::Number => write!(f, "number"),
            ValueKind::Text => write!(f, "string"),
            ValueKind::Boolean => write!(f, "boolean"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let tests = vec![
            (Value::Number(11.0), "11"),
            (Value::Number(-2.5), "-2.5"),
            (Value::Text("hi".to_string()), "hi"),
            (Value::Boolean(false), "false"),
        ];

        for (value, expected) in tests {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_truthy() {
        assert_eq!(Value::Number(0.0).truthy(), Ok(false));
        assert_eq!(Value::Number(-1.0).truthy(), Ok(true));
        assert_eq!(Value::Boolean(true).truthy(), Ok(true));
        assert!(matches!(
            Value::from("yes").truthy(),
            Err(OpError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(ValueKind::Number.sentinel(), Value::Number(0.0));
        assert_eq!(ValueKind::Text.sentinel(), Value::Text(String::new()));
        assert_eq!(ValueKind::Boolean.sentinel(), Value::Boolean(false));
        assert_eq!(Value::default(), Value::Number(0.0));
    }
}
