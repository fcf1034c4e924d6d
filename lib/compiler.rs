use crate::{
    builtins::FunctionRegistry,
    code::{AssignScope, CodeBlock, Instruction, PostfixSequence, Statement, StatementKind},
    error::{Result, ScriptError},
    lexer::tokenize_spanned,
    postfix::convert_spanned,
    token::Token,
};

/// Compile script source into a [`CodeBlock`].
///
/// When `functions` is given, calls to registered functions are checked
/// against their arity. Calls to names that aren't registered compile fine
/// and fail when executed.
pub fn compile(source: &str, functions: Option<&FunctionRegistry>) -> Result<CodeBlock> {
    let mut compiler = Compiler::new(functions);
    for (index, line) in source.lines().enumerate() {
        compiler.compile_line(index + 1, line)?;
    }
    compiler.finish()
}

struct Compiler<'a> {
    functions: Option<&'a FunctionRegistry>,
    statements: Vec<Statement>,
    open: Vec<Conditional>,
    closed: Option<Conditional>,
}

#[derive(Debug)]
struct Conditional {
    /// Branch of the current clause, patched to the start of the next one.
    branch: Option<usize>,
    /// Jumps out of finished clauses, patched to the end of the chain.
    end_jumps: Vec<usize>,
    has_else: bool,
    line: usize,
    column: usize,
}

type Chunk<'t> = (&'t [(usize, Token)], Option<&'t (usize, Token)>);

impl<'a> Compiler<'a> {
    fn new(functions: Option<&'a FunctionRegistry>) -> Self {
        Self {
            functions,
            statements: vec![],
            open: vec![],
            closed: None,
        }
    }

    fn compile_line(&mut self, line: usize, source: &str) -> Result<()> {
        let tokens = tokenize_spanned(source).map_err(|error| error.at_line(line))?;
        if tokens.is_empty() {
            return Ok(());
        }

        for (chunk, terminator) in split_chunks(&tokens) {
            self.compile_chunk(line, chunk, terminator)?;
        }
        Ok(())
    }

    fn compile_chunk(
        &mut self,
        line: usize,
        tokens: &[(usize, Token)],
        terminator: Option<&(usize, Token)>,
    ) -> Result<()> {
        match tokens.first() {
            Some((column, Token::If)) => {
                self.finalize_closed();
                self.expect_open_brace(line, *column, "if", terminator)?;
                let branch = self.emit_branch(line, *column, &tokens[1..], "if")?;
                self.open.push(Conditional {
                    branch: Some(branch),
                    end_jumps: vec![],
                    has_else: false,
                    line,
                    column: *column,
                });
                Ok(())
            }
            Some((column, Token::Elseif)) => {
                let mut conditional = self.continue_chain(line, *column, "elseif")?;
                self.expect_open_brace(line, *column, "elseif", terminator)?;
                conditional.end_jumps.push(self.emit(line, StatementKind::Jump { target: 0 }));
                self.patch_branch(&conditional);
                conditional.branch = Some(self.emit_branch(line, *column, &tokens[1..], "elseif")?);
                self.open.push(conditional);
                Ok(())
            }
            Some((column, Token::Else)) => {
                let mut conditional = self.continue_chain(line, *column, "else")?;
                if let Some((column, token)) = tokens.get(1) {
                    let message = format!("unexpected '{}' after else", token);
                    return Err(syntax_error(line, *column, message));
                }
                self.expect_open_brace(line, *column, "else", terminator)?;
                conditional.end_jumps.push(self.emit(line, StatementKind::Jump { target: 0 }));
                self.patch_branch(&conditional);
                conditional.branch = None;
                conditional.has_else = true;
                self.open.push(conditional);
                Ok(())
            }
            Some(_) => {
                self.finalize_closed();
                self.compile_statement(line, tokens)?;
                self.close_chunk(line, terminator)
            }
            None => {
                if matches!(terminator, Some((_, Token::Rbrace))) {
                    self.finalize_closed();
                }
                self.close_chunk(line, terminator)
            }
        }
    }

    fn close_chunk(&mut self, line: usize, terminator: Option<&(usize, Token)>) -> Result<()> {
        match terminator {
            Some((column, Token::Rbrace)) => match self.open.pop() {
                Some(conditional) => {
                    self.closed = Some(conditional);
                    Ok(())
                }
                None => Err(syntax_error(line, *column, "unmatched '}'".to_string())),
            },
            Some((column, Token::Lbrace)) => Err(syntax_error(
                line,
                *column,
                "'{' is only allowed after if, elseif or else".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn compile_statement(&mut self, line: usize, tokens: &[(usize, Token)]) -> Result<()> {
        let kind = match tokens {
            [(_, Token::Ident(target)), (_, Token::Assign), value @ ..] => {
                StatementKind::Assignment {
                    target: target.clone(),
                    scope: AssignScope::Auto,
                    value: self.expression(line, value, false)?,
                }
            }
            [(_, Token::Global), (_, Token::Ident(target)), (_, Token::Assign), value @ ..] => {
                StatementKind::Assignment {
                    target: target.clone(),
                    scope: AssignScope::Global,
                    value: self.expression(line, value, false)?,
                }
            }
            [(column, Token::Global), ..] => {
                return Err(syntax_error(
                    line,
                    *column,
                    "global must be followed by an assignment".to_string(),
                ));
            }
            _ => StatementKind::Expression(self.expression(line, tokens, true)?),
        };
        self.emit(line, kind);
        Ok(())
    }

    /// Convert one expression and check its calls to registered functions.
    /// Only a bare expression statement may end in a call to a void function.
    fn expression(
        &self,
        line: usize,
        tokens: &[(usize, Token)],
        bare: bool,
    ) -> Result<PostfixSequence> {
        let sequence = convert_spanned(tokens).map_err(|error| error.at_line(line))?;
        let Some(functions) = self.functions else {
            return Ok(sequence);
        };

        let last = sequence.len().saturating_sub(1);
        for (index, instruction) in sequence.instructions().iter().enumerate() {
            let Instruction::Call { name, args } = instruction else {
                continue;
            };
            let Some(entry) = functions.get(name) else {
                continue;
            };
            if !entry.arity().accepts(*args) {
                return Err(syntax_error(
                    line,
                    call_column(tokens, name),
                    format!(
                        "wrong number of arguments for {}: want {}, got {}",
                        name,
                        entry.arity(),
                        args
                    ),
                ));
            }
            if !entry.returns_value() && !(bare && index == last) {
                return Err(syntax_error(
                    line,
                    call_column(tokens, name),
                    format!("{} returns no value to use", name),
                ));
            }
        }
        Ok(sequence)
    }

    fn emit(&mut self, line: usize, kind: StatementKind) -> usize {
        self.statements.push(Statement { line, kind });
        self.statements.len() - 1
    }

    fn emit_branch(
        &mut self,
        line: usize,
        column: usize,
        condition: &[(usize, Token)],
        keyword: &str,
    ) -> Result<usize> {
        if condition.is_empty() {
            return Err(syntax_error(line, column, format!("{} is missing its condition", keyword)));
        }
        let condition = self.expression(line, condition, false)?;
        Ok(self.emit(line, StatementKind::Branch { condition, target: 0 }))
    }

    fn expect_open_brace(
        &self,
        line: usize,
        column: usize,
        keyword: &str,
        terminator: Option<&(usize, Token)>,
    ) -> Result<()> {
        match terminator {
            Some((_, Token::Lbrace)) => Ok(()),
            _ => Err(syntax_error(line, column, format!("expected '{{' after {}", keyword))),
        }
    }

    fn continue_chain(&mut self, line: usize, column: usize, keyword: &str) -> Result<Conditional> {
        match self.closed.take() {
            Some(conditional) if conditional.has_else => Err(syntax_error(
                line,
                column,
                format!("{} after the final else", keyword),
            )),
            Some(conditional) => Ok(conditional),
            None => Err(syntax_error(line, column, format!("{} without a matching if", keyword))),
        }
    }

    fn patch_branch(&mut self, conditional: &Conditional) {
        if let Some(index) = conditional.branch {
            let next = self.statements.len();
            if let StatementKind::Branch { target, .. } = &mut self.statements[index].kind {
                *target = next;
            }
        }
    }

    fn finalize_closed(&mut self) {
        let Some(conditional) = self.closed.take() else {
            return;
        };
        self.patch_branch(&conditional);
        let end = self.statements.len();
        for index in conditional.end_jumps {
            if let StatementKind::Jump { target } = &mut self.statements[index].kind {
                *target = end;
            }
        }
    }

    fn finish(mut self) -> Result<CodeBlock> {
        if let Some(conditional) = self.open.last() {
            return Err(syntax_error(
                conditional.line,
                conditional.column,
                "'{' is never closed".to_string(),
            ));
        }
        self.finalize_closed();
        tracing::debug!(statements = self.statements.len(), "compiled code block");
        Ok(CodeBlock::new(self.statements))
    }
}

fn split_chunks(tokens: &[(usize, Token)]) -> Vec<Chunk<'_>> {
    let mut chunks = vec![];
    let mut start = 0;
    for (index, spanned) in tokens.iter().enumerate() {
        if spanned.1.is_separator() {
            chunks.push((&tokens[start..index], Some(spanned)));
            start = index + 1;
        }
    }
    if start < tokens.len() {
        chunks.push((&tokens[start..], None));
    }
    chunks
}

fn call_column(tokens: &[(usize, Token)], name: &str) -> usize {
    tokens
        .windows(2)
        .find_map(|pair| match pair {
            [(column, Token::Ident(ident)), (_, Token::Lparen)] if ident == name => Some(*column),
            _ => None,
        })
        .or_else(|| tokens.first().map(|(column, _)| *column))
        .unwrap_or(1)
}

fn syntax_error(line: usize, column: usize, message: String) -> ScriptError {
    ScriptError::Syntax {
        line,
        column,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    fn listing(source: &str) -> String {
        compile(source, None).unwrap().to_string()
    }

    #[test]
    fn test_statements() {
        let tests = vec![
            ("x = 3 + 4 * 2", "0000 ASSIGN x := 3 4 2 * +\n"),
            ("debug(x)", "0000 EVAL x debug/1\n"),
            (
                "# comment\n\n  a = 1\nb = a + 1  # trailing",
                "0000 ASSIGN a := 1\n0001 ASSIGN b := a 1 +\n",
            ),
            ("a = 1; b = 2;", "0000 ASSIGN a := 1\n0001 ASSIGN b := 2\n"),
            ("global score = score + 1", "0000 ASSIGN global score := score 1 +\n"),
            ("name = \"ship\"", "0000 ASSIGN name := \"ship\"\n"),
        ];

        for (input, expected) in tests {
            assert_eq!(listing(input), expected, "{}", input);
        }
    }

    #[test]
    fn test_statement_lines() {
        let block = compile("\n# header\nx = 1\n\ny = 2", None).unwrap();
        let lines: Vec<usize> = block.statements().iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![3, 5]);
    }

    #[test]
    fn test_conditionals() {
        let tests = vec![
            (
                "if x > 1 { y = 1 }",
                vec!["0000 BRANCH 0002 unless x 1 >", "0001 ASSIGN y := 1"],
            ),
            (
                "if a { y = 1 } else { y = 2 }",
                vec![
                    "0000 BRANCH 0003 unless a",
                    "0001 ASSIGN y := 1",
                    "0002 JUMP 0004",
                    "0003 ASSIGN y := 2",
                ],
            ),
            (
                "if a {\n  y = 1\n} elseif b {\n  y = 2\n}\nelse {\n  y = 3\n}\nz = 0",
                vec![
                    "0000 BRANCH 0003 unless a",
                    "0001 ASSIGN y := 1",
                    "0002 JUMP 0007",
                    "0003 BRANCH 0006 unless b",
                    "0004 ASSIGN y := 2",
                    "0005 JUMP 0007",
                    "0006 ASSIGN y := 3",
                    "0007 ASSIGN z := 0",
                ],
            ),
            (
                "if a { if b { y = 1 } else { y = 2 } }\ny = y + 1",
                vec![
                    "0000 BRANCH 0005 unless a",
                    "0001 BRANCH 0004 unless b",
                    "0002 ASSIGN y := 1",
                    "0003 JUMP 0005",
                    "0004 ASSIGN y := 2",
                    "0005 ASSIGN y := y 1 +",
                ],
            ),
        ];

        for (input, expected) in tests {
            let actual = listing(input);
            let actual: Vec<&str> = actual.lines().collect();
            assert_eq!(actual, expected, "{}", input);
        }
    }

    #[test]
    fn test_syntax_errors() {
        let tests = vec![
            ("x = (1 + 2", 1),
            ("a = 1\nb = 2 +", 2),
            ("a = 1\n\n}", 3),
            ("if x { a = 1", 1),
            ("if x a = 1", 1),
            ("if { a = 1 }", 1),
            ("else { a = 1 }", 1),
            ("x = 1\nelseif y { a = 1 }", 2),
            ("if a { } else { } else { }", 1),
            ("if a { } else b { }", 1),
            ("x = 1 {", 1),
            ("global = 3", 1),
            ("global x", 1),
        ];

        for (input, expected_line) in tests {
            match compile(input, None) {
                Err(ScriptError::Syntax { line, .. }) => {
                    assert_eq!(line, expected_line, "{}", input)
                }
                other => panic!("expected syntax error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_compile_error_context() {
        assert_eq!(
            compile("a = 1\nb = \"open", None),
            Err(ScriptError::Lex {
                line: 2,
                column: 5,
                message: "unterminated string literal".to_string(),
            })
        );
        assert_eq!(
            compile("a = 1\nb =", None),
            Err(ScriptError::EmptyExpression { line: 2 })
        );
    }

    #[test]
    fn test_arity_checked_for_known_functions() {
        let registry = registry();
        assert!(compile("d = distance(1, 2)", Some(&registry)).is_ok());
        assert!(compile("m = max(1, 2, 3, 4)", Some(&registry)).is_ok());
        assert!(compile("unknown_fn(1, 2, 3)", Some(&registry)).is_ok());

        match compile("x = 1\nd = 5 + distance(1)", Some(&registry)) {
            Err(ScriptError::Syntax { line, column, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, 9);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }

        let tests = vec![
            ("trigger_event(\"a\", 1, 2)", false),
            ("trigger_event()", false),
            ("trigger_event(\"a\", 1)", true),
        ];
        for (input, ok) in tests {
            assert_eq!(compile(input, Some(&registry)).is_ok(), ok, "{}", input);
        }
    }

    #[test]
    fn test_void_function_results_rejected() {
        let registry = registry();
        assert!(compile("trigger_event(\"hit\")", Some(&registry)).is_ok());

        let tests = vec![
            "y = debug(trigger_event(\"x\"))",
            "y = trigger_event(\"x\")",
            "global y = trigger_event(\"x\")",
            "1 + trigger_event(\"x\")",
            "if trigger_event(\"x\") { a = 1 }",
            "max(1, trigger_event(\"x\"))",
        ];
        for input in tests {
            match compile(input, Some(&registry)) {
                Err(ScriptError::Syntax { line: 1, message, .. }) => {
                    assert!(message.contains("trigger_event"), "{}", input)
                }
                other => panic!("expected syntax error for {:?}, got {:?}", input, other),
            }
        }
    }
}
