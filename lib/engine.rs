use std::{collections::HashMap, sync::Arc};

use crate::{
    builtins::{Arity, CallContext, FunctionEntry, FunctionRegistry},
    code::CodeBlock,
    compiler,
    error::{Result, ScriptError},
    events::{Event, EventSink},
    object::Value,
    symbol_table::SymbolTable,
    vm::{ExecutionResult, Scope, VirtualMachine},
};

const STACK_LIMIT: usize = 2048;
const MAX_EVENT_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub stack_limit: usize,
    pub strict_symbols: bool,
    pub max_event_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stack_limit: STACK_LIMIT,
            strict_symbols: false,
            max_event_depth: MAX_EVENT_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn stack_limit(mut self, stack_limit: usize) -> Self {
        self.stack_limit = stack_limit;
        self
    }

    pub fn strict_symbols(mut self, strict_symbols: bool) -> Self {
        self.strict_symbols = strict_symbols;
        self
    }

    pub fn max_event_depth(mut self, max_event_depth: usize) -> Self {
        self.max_event_depth = max_event_depth;
        self
    }
}

pub struct LanguageEngine {
    functions: FunctionRegistry,
    constants: SymbolTable,
    config: EngineConfig,
}

impl LanguageEngine {
    pub fn new() -> Self {
        let mut constants = SymbolTable::new();
        constants.set_constant("pi", Value::Number(std::f64::consts::PI));
        constants.set_constant("e", Value::Number(std::f64::consts::E));

        Self {
            functions: FunctionRegistry::new(),
            constants,
            config: EngineConfig::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self {
            functions: FunctionRegistry::with_builtins(),
            ..Self::new()
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_function<F>(&mut self, name: &str, arity: Arity, handler: F) -> Result<()>
    where
        F: Fn(&mut CallContext<'_>, &[Value]) -> anyhow::Result<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.register(FunctionEntry::new(name, arity, handler))
    }

    pub fn register(&mut self, entry: FunctionEntry) -> Result<()> {
        self.functions.register(entry)
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn constants(&self) -> &SymbolTable {
        &self.constants
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compile(&self, source: &str) -> Result<CodeBlock> {
        compiler::compile(source, Some(&self.functions))
    }

    pub fn run(
        &self,
        block: &CodeBlock,
        symbols: &mut SymbolTable,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionResult> {
        self.run_scoped(block, &mut Scope::new(symbols), events)
    }

    pub fn run_scoped(
        &self,
        block: &CodeBlock,
        scope: &mut Scope<'_>,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionResult> {
        VirtualMachine::new(&self.functions, &self.constants, &self.config)
            .run(block, scope, events)
    }

    pub fn is_pure(&self, block: &CodeBlock) -> bool {
        block.is_pure(&self.functions)
    }
}

impl Default for LanguageEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub struct ScriptLibrary {
    engine: Arc<LanguageEngine>,
    blocks: HashMap<String, Arc<CodeBlock>>,
}

impl ScriptLibrary {
    pub fn new(engine: Arc<LanguageEngine>) -> Self {
        Self {
            engine,
            blocks: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, source: &str) -> Result<Arc<CodeBlock>> {
        if self.blocks.contains_key(name) {
            return Err(ScriptError::DuplicateCodeBlock(name.to_string()));
        }
        let block = Arc::new(self.engine.compile(source)?);
        self.blocks.insert(name.to_string(), block.clone());
        tracing::info!(name, statements = block.len(), "registered code block");
        Ok(block)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CodeBlock>> {
        self.blocks.get(name).cloned()
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<CodeBlock>> {
        self.blocks.remove(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn execute(
        &self,
        name: &str,
        symbols: &mut SymbolTable,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionResult> {
        let block = self
            .blocks
            .get(name)
            .ok_or_else(|| ScriptError::UnknownCodeBlock(name.to_string()))?;
        self.engine.run(block, symbols, events)
    }
}

pub struct Session {
    engine: Arc<LanguageEngine>,
    symbols: SymbolTable,
    events: Vec<Event>,
}

impl Session {
    pub fn new(engine: Arc<LanguageEngine>) -> Self {
        Self {
            engine,
            symbols: SymbolTable::new(),
            events: vec![],
        }
    }

    pub fn run(&mut self, input: &str) -> Result<Option<Value>> {
        let block = self.engine.compile(input)?;
        let result = self.engine.run(&block, &mut self.symbols, &mut self.events)?;
        Ok(result.last_value)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
