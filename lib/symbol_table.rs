use std::{collections::HashMap, fmt, sync::Arc};

use crate::object::{Value, ValueKind};

pub type SymbolObserver = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SymbolTable {
    store: HashMap<String, Value>,
    constants: HashMap<String, Value>,
    observer: Option<SymbolObserver>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn with_observer(observer: SymbolObserver) -> SymbolTable {
        SymbolTable {
            observer: Some(observer),
            ..SymbolTable::default()
        }
    }

    pub fn from_values<I, K>(values: I) -> SymbolTable
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        SymbolTable {
            store: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..SymbolTable::default()
        }
    }

    /// Look a symbol up, falling back to the number sentinel `0` when absent.
    pub fn get(&self, name: &str) -> Value {
        self.lookup(name).cloned().unwrap_or_default()
    }

    /// Look a symbol up, falling back to the sentinel of the requested kind.
    pub fn get_or_sentinel(&self, name: &str, kind: ValueKind) -> Value {
        self.lookup(name).cloned().unwrap_or_else(|| kind.sentinel())
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.constants.get(name).or_else(|| self.store.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    /// Overwrite or create a variable. Returns false when `name` is a constant.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        if self.constants.contains_key(name) {
            return false;
        }
        if let Some(observer) = &self.observer {
            observer(name, &value);
        }
        self.store.insert(name.to_string(), value);
        true
    }

    pub fn set_constant(&mut self, name: &str, value: Value) {
        self.constants.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.store.remove(name)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .store
            .keys()
            .chain(self.constants.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.store.clone()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("store", &self.store)
            .field("constants", &self.constants)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.keys() {
            let marker = if self.is_constant(&name) { " (const)" } else { "" };
            writeln!(f, "{} = {}{}", name, self.get(&name), marker)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut table = SymbolTable::new();
        let tests = vec![
            ("x", Value::Number(49.0)),
            ("name", Value::from("ship")),
            ("alive", Value::Boolean(true)),
        ];

        for (name, value) in tests.iter() {
            assert!(table.set(name, value.clone()));
        }

        for (name, expected) in tests.iter() {
            assert_eq!(table.get(name), *expected);
        }

        table.set("x", Value::Number(1.0));
        assert_eq!(table.get("x"), Value::Number(1.0));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_unknown_symbols_read_as_sentinels() {
        let table = SymbolTable::new();
        for name in ["x", "Y", "not_yet_defined", ""] {
            assert_eq!(table.get(name), Value::Number(0.0));
            assert_eq!(
                table.get_or_sentinel(name, ValueKind::Text),
                Value::Text(String::new())
            );
            assert_eq!(
                table.get_or_sentinel(name, ValueKind::Boolean),
                Value::Boolean(false)
            );
        }
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let mut table = SymbolTable::new();
        table.set("Speed", Value::Number(3.0));
        assert_eq!(table.get("speed"), Value::Number(0.0));
        assert_eq!(table.get("Speed"), Value::Number(3.0));
    }

    #[test]
    fn test_constants() {
        let mut table = SymbolTable::new();
        table.set_constant("pi", Value::Number(std::f64::consts::PI));

        assert!(!table.set("pi", Value::Number(3.0)));
        assert_eq!(table.get("pi"), Value::Number(std::f64::consts::PI));
        assert!(table.is_constant("pi"));
        assert!(table.snapshot().is_empty());
        assert_eq!(table.keys(), vec!["pi".to_string()]);
    }

    #[test]
    fn test_observer() {
        let changes = Arc::new(Mutex::new(vec![]));
        let recorded = changes.clone();
        let mut table = SymbolTable::with_observer(Arc::new(move |name: &str, value: &Value| {
            recorded
                .lock()
                .unwrap()
                .push((name.to_string(), value.clone()));
        }));

        table.set("x", Value::Number(1.0));
        table.set("y", Value::from("up"));

        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                ("x".to_string(), Value::Number(1.0)),
                ("y".to_string(), Value::from("up")),
            ]
        );
    }

    #[test]
    fn test_snapshot_and_remove() {
        let mut table =
            SymbolTable::from_values([("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        assert_eq!(table.remove("a"), Some(Value::Number(1.0)));
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("b"), Some(&Value::Number(2.0)));
        assert_eq!(table.to_string(), "b = 2\n");
    }
}
