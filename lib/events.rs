use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use crate::{
    code::CodeBlock,
    engine::LanguageEngine,
    error::{Result, ScriptError},
    object::Value,
    symbol_table::SymbolTable,
    vm::Scope,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Parameters = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    Instance(InstanceId),
}

impl Target {
    fn includes(&self, instance: InstanceId) -> bool {
        match self {
            Target::Broadcast => true,
            Target::Instance(id) => *id == instance,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub parameters: Parameters,
    pub target: Target,
}

impl Event {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: Parameters::new(),
            target: Target::Broadcast,
        }
    }

    pub fn with_parameter(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn to_instance(mut self, instance: InstanceId) -> Self {
        self.target = Target::Instance(instance);
        self
    }

    pub fn kind(&self) -> EventKind {
        EventKind::classify(&self.name)
    }

    /// The other object's name for `collision_<object>` events.
    pub fn collision_with(&self) -> Option<&str> {
        self.name
            .strip_prefix("collision_")
            .filter(|other| !other.is_empty())
    }

    /// The alarm number for `alarm<n>` events.
    pub fn alarm_number(&self) -> Option<u8> {
        alarm_number(&self.name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Event {:?}", self.name)?;
        if !self.parameters.is_empty() {
            let parameters: Vec<String> = self
                .parameters
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            write!(f, " {}", parameters.join(","))?;
        }
        write!(f, ">")
    }
}

const ALARM_COUNT: u8 = 12;

fn alarm_number(name: &str) -> Option<u8> {
    let number: u8 = name.strip_prefix("alarm")?.parse().ok()?;
    (number < ALARM_COUNT).then_some(number)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ObjectState,
    Alarm,
    Step,
    Mouse,
    Key,
    Collision,
    Draw,
    Other,
}

impl EventKind {
    pub fn classify(name: &str) -> EventKind {
        match name {
            "create" | "create_child" | "destroy" | "destroy_child" | "destroy_parent" => {
                EventKind::ObjectState
            }
            "begin_step" | "normal_step" | "end_step" => EventKind::Step,
            "draw" | "gui" => EventKind::Draw,
            _ if alarm_number(name).is_some() => EventKind::Alarm,
            _ if name.starts_with("mouse_") => EventKind::Mouse,
            _ if name.starts_with("kb_") => EventKind::Key,
            _ if name.len() > "collision_".len() && name.starts_with("collision_") => {
                EventKind::Collision
            }
            _ => EventKind::Other,
        }
    }
}

pub trait EventSink {
    fn trigger(&mut self, event: Event) -> Result<()>;
}

impl EventSink for Vec<Event> {
    fn trigger(&mut self, event: Event) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn trigger(&mut self, _: Event) -> Result<()> {
        Ok(())
    }
}

/// Collects events triggered during a dispatch pass so they can be queued
/// one level deeper than the event being delivered.
struct DeferredSink {
    depth: usize,
    limit: usize,
    pending: Vec<Event>,
}

impl EventSink for DeferredSink {
    fn trigger(&mut self, event: Event) -> Result<()> {
        if self.depth + 1 > self.limit {
            return Err(ScriptError::EventRecursion {
                event: event.name,
                limit: self.limit,
            });
        }
        self.pending.push(event);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Queued,
    Dispatching,
}

#[derive(Debug, Clone)]
struct Subscription {
    instance: InstanceId,
    block: Arc<CodeBlock>,
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: Event,
    depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub event: String,
    pub instance: InstanceId,
    pub error: ScriptError,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }

    fn recursion_error(&self) -> Option<ScriptError> {
        self.failures
            .iter()
            .find(|failure| matches!(failure.error, ScriptError::EventRecursion { .. }))
            .map(|failure| failure.error.clone())
    }
}

pub struct EventEngine {
    engine: Arc<LanguageEngine>,
    instances: BTreeMap<InstanceId, SymbolTable>,
    globals: SymbolTable,
    subscriptions: HashMap<String, Vec<Subscription>>,
    queue: VecDeque<QueuedEvent>,
    dispatching: Option<(String, InstanceId)>,
    next_id: u64,
}

impl EventEngine {
    pub fn new(engine: Arc<LanguageEngine>) -> Self {
        Self {
            engine,
            instances: BTreeMap::new(),
            globals: SymbolTable::new(),
            subscriptions: HashMap::new(),
            queue: VecDeque::new(),
            dispatching: None,
            next_id: 1,
        }
    }

    pub fn language(&self) -> &LanguageEngine {
        &self.engine
    }

    pub fn add_instance(&mut self) -> InstanceId {
        self.add_instance_with(SymbolTable::new())
    }

    pub fn add_instance_with(&mut self, symbols: SymbolTable) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.instances.insert(id, symbols);
        tracing::debug!(instance = %id, "added instance");
        id
    }

    pub fn remove_instance(&mut self, instance: InstanceId) -> Option<SymbolTable> {
        let symbols = self.instances.remove(&instance)?;
        for subscriptions in self.subscriptions.values_mut() {
            subscriptions.retain(|subscription| subscription.instance != instance);
        }
        self.subscriptions.retain(|_, subscriptions| !subscriptions.is_empty());
        tracing::debug!(%instance, "removed instance");
        Some(symbols)
    }

    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.keys().copied()
    }

    pub fn symbols(&self, instance: InstanceId) -> Option<&SymbolTable> {
        self.instances.get(&instance)
    }

    pub fn symbols_mut(&mut self, instance: InstanceId) -> Option<&mut SymbolTable> {
        self.instances.get_mut(&instance)
    }

    pub fn globals(&self) -> &SymbolTable {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut SymbolTable {
        &mut self.globals
    }

    /// Run `block` for `instance` whenever `event_name` is delivered. A
    /// second subscription to the same event replaces the block in place.
    pub fn subscribe(
        &mut self,
        event_name: &str,
        instance: InstanceId,
        block: Arc<CodeBlock>,
    ) -> Result<()> {
        if !self.instances.contains_key(&instance) {
            return Err(ScriptError::UnknownInstance(instance));
        }

        let subscriptions = self.subscriptions.entry(event_name.to_string()).or_default();
        match subscriptions.iter_mut().find(|s| s.instance == instance) {
            Some(existing) => existing.block = block,
            None => subscriptions.push(Subscription { instance, block }),
        }
        tracing::info!(event = event_name, %instance, "subscribed");
        Ok(())
    }

    pub fn unsubscribe(&mut self, instance: InstanceId, event_name: &str) -> bool {
        let Some(subscriptions) = self.subscriptions.get_mut(event_name) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.instance != instance);
        let removed = subscriptions.len() != before;
        if subscriptions.is_empty() {
            self.subscriptions.remove(event_name);
        }
        if removed {
            tracing::info!(event = event_name, %instance, "unsubscribed");
        }
        removed
    }

    pub fn is_subscribed(&self, instance: InstanceId, event_name: &str) -> bool {
        self.subscriptions
            .get(event_name)
            .is_some_and(|subscriptions| subscriptions.iter().any(|s| s.instance == instance))
    }

    /// `None` when the instance isn't subscribed to `event_name`.
    pub fn subscription_state(
        &self,
        instance: InstanceId,
        event_name: &str,
    ) -> Option<SubscriptionState> {
        if !self.is_subscribed(instance, event_name) {
            return None;
        }
        if let Some((name, current)) = &self.dispatching {
            if name == event_name && *current == instance {
                return Some(SubscriptionState::Dispatching);
            }
        }
        let queued = self.queue.iter().any(|queued| {
            queued.event.name == event_name && queued.event.target.includes(instance)
        });
        Some(if queued {
            SubscriptionState::Queued
        } else {
            SubscriptionState::Idle
        })
    }

    /// Deliver `event` now. Events triggered by the scripts it runs are
    /// queued for the next pass.
    pub fn trigger(&mut self, event: Event) -> Result<DispatchReport> {
        let report = self.deliver(event, 0);
        match report.recursion_error() {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    pub fn queue_event(&mut self, event: Event) {
        tracing::debug!(%event, "queued event");
        self.queue.push_back(QueuedEvent { event, depth: 0 });
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Deliver everything queued before this call, in trigger order. Events
    /// triggered while delivering wait for the next call.
    pub fn process_queue(&mut self) -> Result<DispatchReport> {
        let pending = std::mem::take(&mut self.queue);
        self.deliver_all(pending.into_iter().collect())
    }

    pub fn transmit(&mut self, event_name: &str) -> Result<DispatchReport> {
        let pending = self.take_queued(|event| event.name == event_name);
        self.deliver_all(pending)
    }

    pub fn transmit_kind(&mut self, kind: EventKind) -> Result<DispatchReport> {
        let pending = self.take_queued(|event| event.kind() == kind);
        self.deliver_all(pending)
    }

    fn take_queued(&mut self, mut matches: impl FnMut(&Event) -> bool) -> Vec<QueuedEvent> {
        let (taken, kept): (Vec<QueuedEvent>, Vec<QueuedEvent>) =
            self.queue.drain(..).partition(|queued| matches(&queued.event));
        self.queue = kept.into();
        taken
    }

    fn deliver_all(&mut self, pending: Vec<QueuedEvent>) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for queued in pending {
            report.merge(self.deliver(queued.event, queued.depth));
        }
        match report.recursion_error() {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    fn deliver(&mut self, event: Event, depth: usize) -> DispatchReport {
        let mut report = DispatchReport::default();
        let targets: Vec<Subscription> = self
            .subscriptions
            .get(&event.name)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .filter(|subscription| event.target.includes(subscription.instance))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if targets.is_empty() {
            tracing::debug!(%event, "no subscribers");
            return report;
        }

        let mut sink = DeferredSink {
            depth,
            limit: self.engine.config().max_event_depth,
            pending: vec![],
        };

        for subscription in targets {
            let instance = subscription.instance;
            let Some(locals) = self.instances.get_mut(&instance) else {
                continue;
            };
            self.dispatching = Some((event.name.clone(), instance));
            tracing::debug!(%event, %instance, depth, "delivering event");

            let mut scope = Scope::new(locals)
                .for_instance(instance)
                .with_parameters(&event.parameters)
                .with_globals(&mut self.globals);
            let result = self.engine.run_scoped(&subscription.block, &mut scope, &mut sink);
            report.delivered += 1;

            if let Err(error) = result {
                tracing::warn!(event = %event.name, %instance, %error, "event handler failed");
                report.failures.push(DispatchFailure {
                    event: event.name.clone(),
                    instance,
                    error,
                });
            }
        }
        self.dispatching = None;

        for triggered in sink.pending {
            tracing::debug!(event = %triggered, depth = depth + 1, "deferred event");
            self.queue.push_back(QueuedEvent {
                event: triggered,
                depth: depth + 1,
            });
        }
        report
    }
}

impl EventSink for EventEngine {
    fn trigger(&mut self, event: Event) -> Result<()> {
        EventEngine::trigger(self, event).map(|_| ())
    }
}
