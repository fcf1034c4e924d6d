pub mod builtins;
pub mod code;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod events;
pub mod lexer;
pub mod object;
pub mod postfix;
pub mod symbol_table;
pub mod token;
pub mod vm;

pub use builtins::{Arity, CallContext, FunctionEntry, FunctionRegistry};
pub use code::{CodeBlock, PostfixSequence};
pub use compiler::compile;
pub use engine::{EngineConfig, LanguageEngine, ScriptLibrary, Session};
pub use error::{Result, ScriptError};
pub use events::{
    DispatchReport, Event, EventEngine, EventKind, EventSink, InstanceId, NullSink, Parameters,
    SubscriptionState, Target,
};
pub use lexer::{tokenize, tokenize_spanned};
pub use object::Value;
pub use postfix::convert;
pub use symbol_table::SymbolTable;
pub use vm::{ExecutionResult, Scope};
