use std::fmt;

use crate::{
    builtins::FunctionRegistry,
    object::{OpError, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Negate,
    Identity,
    Not,

    Pow,
    Mul,
    Div,
    Mod,
    Add,
    Sub,

    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,

    And,
    Or,
}

impl Operator {
    /// Higher binds tighter. Prefix operators outrank every binary operator
    /// except `not`, which sits between comparisons and `and`.
    pub fn precedence(&self) -> u8 {
        match self {
            Operator::Negate | Operator::Identity => 8,
            Operator::Pow => 7,
            Operator::Mul | Operator::Div | Operator::Mod => 6,
            Operator::Add | Operator::Sub => 5,
            Operator::Lt
            | Operator::LtEq
            | Operator::Gt
            | Operator::GtEq
            | Operator::Eq
            | Operator::NotEq => 4,
            Operator::Not => 3,
            Operator::And => 2,
            Operator::Or => 1,
        }
    }

    pub fn associativity(&self) -> Associativity {
        match self {
            Operator::Negate | Operator::Identity | Operator::Not | Operator::Pow => {
                Associativity::Right
            }
            _ => Associativity::Left,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Operator::Negate | Operator::Identity | Operator::Not => 1,
            _ => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Negate => "neg",
            Operator::Identity => "pos",
            Operator::Not => "not",
            Operator::Pow => "^",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::And => "and",
            Operator::Or => "or",
        }
    }

    pub fn apply(&self, operands: &[Value]) -> Result<Value, OpError> {
        if operands.len() != self.arity() {
            return Err(OpError::Runtime(format!(
                "operator {} expects {} operands, got {}",
                self.symbol(),
                self.arity(),
                operands.len()
            )));
        }

        match (self, operands) {
            (Operator::Negate, [Value::Number(value)]) => Ok(Value::Number(-value)),
            (Operator::Identity, [Value::Number(value)]) => Ok(Value::Number(*value)),
            (Operator::Not, [value]) => Ok(Value::Boolean(!value.truthy()?)),
            (Operator::And, [left, right]) => {
                let left = left.truthy()?;
                let right = right.truthy()?;
                Ok(Value::Boolean(left && right))
            }
            (Operator::Or, [left, right]) => {
                let left = left.truthy()?;
                let right = right.truthy()?;
                Ok(Value::Boolean(left || right))
            }
            (Operator::Add, [Value::Text(left), right]) => {
                Ok(Value::Text(format!("{}{}", left, text_operand(self, right)?)))
            }
            (Operator::Add, [Value::Number(left), Value::Text(right)]) => {
                Ok(Value::Text(format!("{}{}", Value::Number(*left), right)))
            }
            (Operator::Eq, [left, right]) => {
                self.same_kind(left, right)?;
                Ok(Value::Boolean(left == right))
            }
            (Operator::NotEq, [left, right]) => {
                self.same_kind(left, right)?;
                Ok(Value::Boolean(left != right))
            }
            (
                Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq,
                [Value::Text(left), Value::Text(right)],
            ) => Ok(Value::Boolean(self.compare(left.as_str().cmp(right.as_str())))),
            (_, [Value::Number(left), Value::Number(right)]) => self.apply_numbers(*left, *right),
            _ => Err(OpError::TypeMismatch(self.mismatch(operands))),
        }
    }

    fn apply_numbers(&self, left: f64, right: f64) -> Result<Value, OpError> {
        let number = match self {
            Operator::Add => left + right,
            Operator::Sub => left - right,
            Operator::Mul => left * right,
            Operator::Div => {
                if right == 0.0 {
                    return Err(OpError::Runtime("division by zero".to_string()));
                }
                left / right
            }
            Operator::Mod => {
                if right == 0.0 {
                    return Err(OpError::Runtime("modulo by zero".to_string()));
                }
                // floored, so the result takes the sign of the divisor
                left - right * (left / right).floor()
            }
            Operator::Pow => left.powf(right),
            Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq => {
                let ordering = left
                    .partial_cmp(&right)
                    .ok_or_else(|| OpError::Runtime("cannot order NaN".to_string()))?;
                return Ok(Value::Boolean(self.compare(ordering)));
            }
            _ => {
                return Err(OpError::TypeMismatch(
                    self.mismatch(&[Value::Number(left), Value::Number(right)]),
                ))
            }
        };
        Ok(Value::Number(number))
    }

    fn compare(&self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Operator::Lt => ordering.is_lt(),
            Operator::LtEq => ordering.is_le(),
            Operator::Gt => ordering.is_gt(),
            Operator::GtEq => ordering.is_ge(),
            _ => false,
        }
    }

    fn same_kind(&self, left: &Value, right: &Value) -> Result<(), OpError> {
        if left.kind() != right.kind() {
            return Err(OpError::TypeMismatch(
                self.mismatch(&[left.clone(), right.clone()]),
            ));
        }
        Ok(())
    }

    fn mismatch(&self, operands: &[Value]) -> String {
        let described: Vec<String> = operands.iter().map(|value| value.describe()).collect();
        format!("unsupported operands for {}: {}", self.symbol(), described.join(", "))
    }
}

fn text_operand(operator: &Operator, value: &Value) -> Result<String, OpError> {
    match value {
        Value::Text(text) => Ok(text.clone()),
        Value::Number(_) => Ok(value.to_string()),
        Value::Boolean(_) => Err(OpError::TypeMismatch(format!(
            "unsupported operands for {}: string, {}",
            operator.symbol(),
            value.describe()
        ))),
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Push(Value),
    Load(String),
    Operator(Operator),
    Call { name: String, args: usize },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Push(Value::Text(text)) => write!(f, "{:?}", text),
            Instruction::Push(value) => write!(f, "{}", value),
            Instruction::Load(name) => write!(f, "{}", name),
            Instruction::Operator(operator) => write!(f, "{}", operator),
            Instruction::Call { name, args } => write!(f, "{}/{}", name, args),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostfixSequence(Vec<Instruction>);

impl PostfixSequence {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self(instructions)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn calls(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().filter_map(|instruction| match instruction {
            Instruction::Call { name, args } => Some((name.as_str(), *args)),
            _ => None,
        })
    }

    /// Replay the sequence counting stack depth. Returns the final depth, or
    /// the index of the first instruction that would underflow.
    pub fn stack_effect(&self) -> Result<usize, usize> {
        let mut depth = 0usize;
        for (index, instruction) in self.0.iter().enumerate() {
            let (pops, pushes) = match instruction {
                Instruction::Push(_) | Instruction::Load(_) => (0, 1),
                Instruction::Operator(operator) => (operator.arity(), 1),
                Instruction::Call { args, .. } => (*args, 1),
            };
            depth = depth.checked_sub(pops).ok_or(index)? + pushes;
        }
        Ok(depth)
    }
}

impl fmt::Display for PostfixSequence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignScope {
    /// Locals, unless the name exists only among the globals.
    Auto,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Expression(PostfixSequence),
    Assignment {
        target: String,
        scope: AssignScope,
        value: PostfixSequence,
    },
    /// Jump to `target` when the condition is falsy.
    Branch {
        condition: PostfixSequence,
        target: usize,
    },
    Jump {
        target: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub kind: StatementKind,
}

impl Statement {
    pub fn expression(&self) -> Option<&PostfixSequence> {
        match &self.kind {
            StatementKind::Expression(value)
            | StatementKind::Assignment { value, .. }
            | StatementKind::Branch {
                condition: value, ..
            } => Some(value),
            StatementKind::Jump { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeBlock {
    statements: Vec<Statement>,
}

impl CodeBlock {
    pub(crate) fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// True when running the block can neither change symbols nor call a
    /// function flagged as having side effects. Unknown functions count as impure.
    pub fn is_pure(&self, functions: &FunctionRegistry) -> bool {
        self.statements.iter().all(|statement| {
            if matches!(statement.kind, StatementKind::Assignment { .. }) {
                return false;
            }
            statement.expression().map_or(true, |sequence| {
                sequence.calls().all(|(name, _)| {
                    functions
                        .get(name)
                        .is_some_and(|entry| !entry.has_side_effects())
                })
            })
        })
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (index, statement) in self.statements.iter().enumerate() {
            write!(f, "{:04} ", index)?;
            match &statement.kind {
                StatementKind::Expression(value) => write!(f, "EVAL {}", value)?,
                StatementKind::Assignment {
                    target,
                    scope,
                    value,
                } => {
                    let prefix = match scope {
                        AssignScope::Global => "global ",
                        AssignScope::Auto => "",
                    };
                    write!(f, "ASSIGN {}{} := {}", prefix, target, value)?
                }
                StatementKind::Branch { condition, target } => {
                    write!(f, "BRANCH {:04} unless {}", target, condition)?
                }
                StatementKind::Jump { target } => write!(f, "JUMP {:04}", target)?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
