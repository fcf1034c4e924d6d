use crate::{
    builtins::{CallContext, FunctionRegistry},
    code::{AssignScope, CodeBlock, Instruction, PostfixSequence, Statement, StatementKind},
    engine::EngineConfig,
    error::{Result, ScriptError},
    events::{EventSink, InstanceId, Parameters},
    object::{OpError, Value},
    symbol_table::SymbolTable,
};

pub struct Scope<'a> {
    pub instance: Option<InstanceId>,
    pub parameters: Option<&'a Parameters>,
    pub locals: &'a mut SymbolTable,
    pub globals: Option<&'a mut SymbolTable>,
}

impl<'a> Scope<'a> {
    pub fn new(locals: &'a mut SymbolTable) -> Self {
        Self {
            instance: None,
            parameters: None,
            locals,
            globals: None,
        }
    }

    pub fn for_instance(mut self, instance: InstanceId) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_parameters(mut self, parameters: &'a Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_globals(mut self, globals: &'a mut SymbolTable) -> Self {
        self.globals = Some(globals);
        self
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.parameters
            .and_then(|parameters| parameters.get(name))
            .or_else(|| self.locals.lookup(name))
            .or_else(|| self.globals.as_ref().and_then(|globals| globals.lookup(name)))
    }

    fn is_constant(&self, name: &str) -> bool {
        self.locals.is_constant(name)
            || self
                .globals
                .as_ref()
                .is_some_and(|globals| globals.is_constant(name))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionResult {
    pub statements_executed: usize,
    /// Value of the last expression statement, if it produced one.
    pub last_value: Option<Value>,
}

pub struct VirtualMachine<'a> {
    functions: &'a FunctionRegistry,
    constants: &'a SymbolTable,
    config: &'a EngineConfig,
    stack: Vec<Value>,
    /// Parallel to `stack`: whether the value is an unknown name's sentinel.
    unset: Vec<bool>,
}

impl<'a> VirtualMachine<'a> {
    pub fn new(
        functions: &'a FunctionRegistry,
        constants: &'a SymbolTable,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            functions,
            constants,
            config,
            stack: Vec::with_capacity(64),
            unset: Vec::with_capacity(64),
        }
    }

    pub fn run(
        &mut self,
        block: &CodeBlock,
        scope: &mut Scope<'_>,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();
        let statements = block.statements();
        let mut pc = 0;

        while pc < statements.len() {
            let statement = &statements[pc];
            tracing::trace!(statement = pc, line = statement.line, "executing statement");
            result.statements_executed += 1;
            let mut next = pc + 1;

            match &statement.kind {
                StatementKind::Expression(sequence) => {
                    result.last_value = self.evaluate(pc, statement, sequence, scope, events)?;
                }
                StatementKind::Assignment {
                    target,
                    scope: assign_scope,
                    value,
                } => {
                    let value = self
                        .evaluate(pc, statement, value, scope, events)?
                        .ok_or_else(|| {
                            runtime_error(pc, statement, format!("nothing to assign to {}", target))
                        })?;
                    self.assign(pc, statement, target, *assign_scope, value, scope)?;
                }
                StatementKind::Branch { condition, target } => {
                    let value = self
                        .evaluate(pc, statement, condition, scope, events)?
                        .ok_or_else(|| {
                            runtime_error(pc, statement, "condition has no value".to_string())
                        })?;
                    let truthy = value
                        .truthy()
                        .map_err(|error| op_error(pc, statement, error))?;
                    if !truthy {
                        next = *target;
                    }
                }
                StatementKind::Jump { target } => next = *target,
            }

            pc = next;
        }

        Ok(result)
    }

    fn evaluate(
        &mut self,
        index: usize,
        statement: &Statement,
        sequence: &PostfixSequence,
        scope: &mut Scope<'_>,
        events: &mut dyn EventSink,
    ) -> Result<Option<Value>> {
        self.stack.clear();
        self.unset.clear();
        let functions = self.functions;

        for instruction in sequence.instructions() {
            match instruction {
                Instruction::Push(value) => self.push(index, statement, value.clone())?,
                Instruction::Load(name) => match self.resolve(index, statement, name, scope)? {
                    Some(value) => self.push(index, statement, value)?,
                    None => {
                        self.push(index, statement, Value::default())?;
                        if let Some(unset) = self.unset.last_mut() {
                            *unset = true;
                        }
                    }
                },
                Instruction::Operator(operator) => {
                    let operands = self.pop_operands(index, statement, operator.arity())?;
                    let value = operator
                        .apply(&operands)
                        .map_err(|error| op_error(index, statement, error))?;
                    self.push(index, statement, value)?;
                }
                Instruction::Call { name, args } => {
                    let entry = functions.get(name).ok_or_else(|| {
                        runtime_error(index, statement, format!("unknown function {}", name))
                    })?;
                    let arguments = self.pop_n(index, statement, *args)?;
                    let mut context = CallContext {
                        instance: scope.instance,
                        symbols: &mut *scope.locals,
                        events: &mut *events,
                    };
                    let returned = entry.call(&mut context, &arguments).map_err(|error| {
                        match error.downcast::<ScriptError>() {
                            Ok(error) => error,
                            Err(error) => runtime_error(index, statement, format!("{:#}", error)),
                        }
                    })?;
                    match (returned, entry.returns_value()) {
                        (Some(value), true) => self.push(index, statement, value)?,
                        (None, true) => {
                            let message = format!("{} returned no value", name);
                            return Err(runtime_error(index, statement, message));
                        }
                        (_, false) => {}
                    }
                }
            }
        }

        Ok(self.stack.pop())
    }

    fn resolve(
        &self,
        index: usize,
        statement: &Statement,
        name: &str,
        scope: &Scope<'_>,
    ) -> Result<Option<Value>> {
        if let Some(value) = scope.lookup(name).or_else(|| self.constants.lookup(name)) {
            return Ok(Some(value.clone()));
        }
        if self.config.strict_symbols {
            return Err(runtime_error(index, statement, format!("unknown identifier {}", name)));
        }
        Ok(None)
    }

    fn assign(
        &self,
        index: usize,
        statement: &Statement,
        target: &str,
        assign_scope: AssignScope,
        value: Value,
        scope: &mut Scope<'_>,
    ) -> Result<()> {
        if scope.is_constant(target) || self.constants.is_constant(target) {
            return Err(runtime_error(
                index,
                statement,
                format!("cannot assign to constant {}", target),
            ));
        }

        let write_global = match assign_scope {
            AssignScope::Global => true,
            AssignScope::Auto => {
                !scope.locals.contains(target)
                    && scope
                        .globals
                        .as_ref()
                        .is_some_and(|globals| globals.contains(target))
            }
        };

        match (&mut scope.globals, write_global) {
            (Some(globals), true) => globals.set(target, value),
            _ => scope.locals.set(target, value),
        };
        Ok(())
    }

    fn push(&mut self, index: usize, statement: &Statement, value: Value) -> Result<()> {
        if self.stack.len() >= self.config.stack_limit {
            return Err(runtime_error(index, statement, "stack overflow".to_string()));
        }
        self.stack.push(value);
        self.unset.push(false);
        Ok(())
    }

    fn pop_n(&mut self, index: usize, statement: &Statement, count: usize) -> Result<Vec<Value>> {
        if self.stack.len() < count {
            return Err(runtime_error(index, statement, "stack underflow".to_string()));
        }
        self.unset.truncate(self.stack.len() - count);
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Pop operator operands. An unknown name paired with a known value
    /// reads as the sentinel of that value's kind, so `name == "ship"`
    /// compares against `""` rather than `0`.
    fn pop_operands(
        &mut self,
        index: usize,
        statement: &Statement,
        count: usize,
    ) -> Result<Vec<Value>> {
        let unset = self.unset[self.unset.len().saturating_sub(count)..].to_vec();
        let mut operands = self.pop_n(index, statement, count)?;
        if let ([left, right], [left_unset, right_unset]) =
            (operands.as_mut_slice(), unset.as_slice())
        {
            match (left_unset, right_unset) {
                (true, false) => *left = right.kind().sentinel(),
                (false, true) => *right = left.kind().sentinel(),
                _ => {}
            }
        }
        Ok(operands)
    }
}

impl CodeBlock {
    pub fn execute(
        &self,
        symbols: &mut SymbolTable,
        functions: &FunctionRegistry,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionResult> {
        let constants = SymbolTable::new();
        let config = EngineConfig::default();
        let mut scope = Scope::new(symbols);
        VirtualMachine::new(functions, &constants, &config).run(self, &mut scope, events)
    }
}

fn runtime_error(index: usize, statement: &Statement, message: String) -> ScriptError {
    ScriptError::Runtime {
        statement: index,
        line: statement.line,
        message,
    }
}

fn op_error(index: usize, statement: &Statement, error: OpError) -> ScriptError {
    match error {
        OpError::TypeMismatch(message) => ScriptError::TypeMismatch {
            statement: index,
            line: statement.line,
            message,
        },
        OpError::Runtime(message) => runtime_error(index, statement, message),
    }
}
