use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, bail, Result};
use rand::Rng;

use crate::{
    error::ScriptError,
    events::{Event, EventSink, InstanceId},
    object::Value,
    symbol_table::SymbolTable,
};

pub struct CallContext<'a> {
    pub instance: Option<InstanceId>,
    pub symbols: &'a mut SymbolTable,
    pub events: &'a mut dyn EventSink,
}

pub type NativeFn = dyn Fn(&mut CallContext<'_>, &[Value]) -> Result<Option<Value>> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range { min: usize, max: usize },
    Variadic { min: usize },
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == *n,
            Arity::Range { min, max } => (*min..=*max).contains(&count),
            Arity::Variadic { min } => count >= *min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arity::Exact(1) => write!(f, "1 argument"),
            Arity::Exact(n) => write!(f, "{} arguments", n),
            Arity::Range { min, max } => write!(f, "{} to {} arguments", min, max),
            Arity::Variadic { min } => write!(f, "at least {} arguments", min),
        }
    }
}

#[derive(Clone)]
pub struct FunctionEntry {
    name: String,
    arity: Arity,
    side_effects: bool,
    returns_value: bool,
    handler: Arc<NativeFn>,
}

impl FunctionEntry {
    pub fn new<F>(name: &str, arity: Arity, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[Value]) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            arity,
            side_effects: true,
            returns_value: true,
            handler: Arc::new(handler),
        }
    }

    pub fn pure(mut self) -> Self {
        self.side_effects = false;
        self
    }

    /// Marks a function called only for its effects. Its result can't be
    /// used as an operand, argument, condition or assigned value.
    pub fn void(mut self) -> Self {
        self.returns_value = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn has_side_effects(&self) -> bool {
        self.side_effects
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn call(&self, context: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        if !self.arity.accepts(args.len()) {
            bail!(
                "wrong number of arguments for {}: want {}, got {}",
                self.name,
                self.arity,
                args.len()
            );
        }
        (self.handler)(context, args)
    }
}

impl fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("side_effects", &self.side_effects)
            .field("returns_value", &self.returns_value)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        Self {
            functions: Builtins::get()
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }

    pub fn register(&mut self, entry: FunctionEntry) -> Result<(), ScriptError> {
        if self.functions.contains_key(entry.name()) {
            return Err(ScriptError::DuplicateName(entry.name().to_string()));
        }
        tracing::info!(name = entry.name(), arity = %entry.arity(), "registered function");
        self.functions.insert(entry.name().to_string(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

pub struct Builtins;

impl Builtins {
    pub fn get() -> Vec<FunctionEntry> {
        vec![
            FunctionEntry::new("distance", Arity::Exact(2), Self::distance_fn).pure(),
            FunctionEntry::new("abs", Arity::Exact(1), Self::abs_fn).pure(),
            FunctionEntry::new("min", Arity::Variadic { min: 1 }, Self::min_fn).pure(),
            FunctionEntry::new("max", Arity::Variadic { min: 1 }, Self::max_fn).pure(),
            FunctionEntry::new("randint", Arity::Exact(1), Self::randint_fn),
            FunctionEntry::new("time", Arity::Exact(0), Self::time_fn),
            FunctionEntry::new("debug", Arity::Exact(1), Self::debug_fn),
            FunctionEntry::new(
                "trigger_event",
                Arity::Range { min: 1, max: 2 },
                Self::trigger_event_fn,
            )
            .void(),
        ]
    }

    fn distance_fn(_: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        let start = number_arg("distance", args, 0)?;
        let end = number_arg("distance", args, 1)?;
        Ok(Some(Value::Number((start - end).abs())))
    }

    fn abs_fn(_: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        Ok(Some(Value::Number(number_arg("abs", args, 0)?.abs())))
    }

    fn min_fn(_: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        let mut lowest = f64::INFINITY;
        for index in 0..args.len() {
            lowest = lowest.min(number_arg("min", args, index)?);
        }
        Ok(Some(Value::Number(lowest)))
    }

    fn max_fn(_: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        let mut highest = f64::NEG_INFINITY;
        for index in 0..args.len() {
            highest = highest.max(number_arg("max", args, index)?);
        }
        Ok(Some(Value::Number(highest)))
    }

    /// A random integer between 0 and `max` inclusive; a negative `max`
    /// mirrors the range below zero.
    fn randint_fn(_: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        let max = number_arg("randint", args, 0)?.trunc() as i64;
        let value = if max >= 0 {
            rand::thread_rng().gen_range(0..=max)
        } else {
            rand::thread_rng().gen_range(max..=0)
        };
        Ok(Some(Value::Number(value as f64)))
    }

    fn time_fn(_: &mut CallContext<'_>, _: &[Value]) -> Result<Option<Value>> {
        let seconds = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        Ok(Some(Value::Number(seconds as f64)))
    }

    fn debug_fn(context: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        let value = args
            .first()
            .cloned()
            .ok_or(anyhow!("argument to `debug` not provided"))?;
        match context.instance {
            Some(instance) => tracing::info!(%instance, "debug: {}", value),
            None => tracing::info!("debug: {}", value),
        }
        Ok(Some(value))
    }

    fn trigger_event_fn(context: &mut CallContext<'_>, args: &[Value]) -> Result<Option<Value>> {
        let name = match args.first() {
            Some(Value::Text(name)) => name.clone(),
            Some(other) => bail!(
                "argument to `trigger_event` must be a string, got {}",
                other.describe()
            ),
            None => bail!("argument to `trigger_event` not provided"),
        };

        let mut event = Event::new(&name);
        if let Some(target) = args.get(1) {
            let id = number_arg("trigger_event", args, 1)?;
            if id < 0.0 || id.fract() != 0.0 {
                bail!("invalid instance id {} for `trigger_event`", target);
            }
            event = event.to_instance(InstanceId(id as u64));
        }
        if let Some(instance) = context.instance {
            event = event.with_parameter("source", Value::Number(instance.0 as f64));
        }

        context.events.trigger(event)?;
        Ok(None)
    }
}

fn number_arg(function: &str, args: &[Value], index: usize) -> Result<f64> {
    match args.get(index) {
        Some(Value::Number(value)) => Ok(*value),
        Some(other) => Err(anyhow!(
            "argument {} to `{}` must be a number, got {}",
            index + 1,
            function,
            other.describe()
        )),
        None => Err(anyhow!("argument {} to `{}` not provided", index + 1, function)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Target;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    fn call(name: &str, args: Vec<Value>) -> (Result<Option<Value>>, Vec<Event>) {
        let registry = registry();
        let mut symbols = SymbolTable::new();
        let mut events: Vec<Event> = vec![];
        let result = {
            let mut context = CallContext {
                instance: Some(InstanceId(7)),
                symbols: &mut symbols,
                events: &mut events,
            };
            registry.get(name).unwrap().call(&mut context, &args)
        };
        (result, events)
    }

    #[test]
    fn test_builtins() {
        let tests = vec![
            ("distance", vec![Value::from(3.0), Value::from(10.0)], Some(Value::Number(7.0))),
            ("abs", vec![Value::from(-2.5)], Some(Value::Number(2.5))),
            (
                "min",
                vec![Value::from(4.0), Value::from(-1.0), Value::from(9.0)],
                Some(Value::Number(-1.0)),
            ),
            ("max", vec![Value::from(4.0)], Some(Value::Number(4.0))),
            ("debug", vec![Value::from("hello")], Some(Value::from("hello"))),
        ];

        for (name, args, expected) in tests {
            let (result, _) = call(name, args);
            assert_eq!(result.unwrap(), expected, "{}", name);
        }
    }

    #[test]
    fn test_randint_range() {
        for _ in 0..50 {
            let (result, _) = call("randint", vec![Value::from(5.0)]);
            let value = result.unwrap().unwrap().as_number().unwrap();
            assert!((0.0..=5.0).contains(&value));

            let (result, _) = call("randint", vec![Value::from(-5.0)]);
            let value = result.unwrap().unwrap().as_number().unwrap();
            assert!((-5.0..=0.0).contains(&value));
        }
    }

    #[test]
    fn test_argument_errors() {
        let tests = vec![
            ("distance", vec![Value::from(1.0)]),
            ("abs", vec![Value::from("x")]),
            ("time", vec![Value::from(1.0)]),
            ("min", vec![]),
            ("trigger_event", vec![Value::from(1.0)]),
            ("trigger_event", vec![Value::from("a"), Value::from(1.0), Value::from(2.0)]),
            ("trigger_event", vec![Value::from("hit"), Value::from(-1.0)]),
        ];

        for (name, args) in tests {
            let (result, _) = call(name, args.clone());
            assert!(result.is_err(), "{} {:?}", name, args);
        }
    }

    #[test]
    fn test_trigger_event() {
        let (result, events) = call("trigger_event", vec![Value::from("hit")]);
        assert_eq!(result.unwrap(), None);
        assert_eq!(
            events,
            vec![Event::new("hit").with_parameter("source", Value::Number(7.0))]
        );

        let (_, events) = call("trigger_event", vec![Value::from("hit"), Value::from(3.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Instance(InstanceId(3)));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = registry();
        let entry = FunctionEntry::new("debug", Arity::Exact(1), |_, _| Ok(None));
        let result = registry.register(entry);
        assert_eq!(result, Err(ScriptError::DuplicateName("debug".to_string())));
    }

    #[test]
    fn test_side_effect_flags() {
        let registry = registry();
        assert!(!registry.get("distance").unwrap().has_side_effects());
        assert!(registry.get("trigger_event").unwrap().has_side_effects());
        assert_eq!(registry.names().first(), Some(&"abs"));
        assert!(Arity::Variadic { min: 1 }.accepts(4));
        assert!(!Arity::Exact(2).accepts(3));
        assert!(Arity::Range { min: 1, max: 2 }.accepts(2));
        assert!(!Arity::Range { min: 1, max: 2 }.accepts(3));
        assert!(!registry.get("trigger_event").unwrap().returns_value());
        assert!(registry.get("debug").unwrap().returns_value());
    }
}
