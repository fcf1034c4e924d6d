use crate::{
    code::{Associativity, Instruction, Operator, PostfixSequence},
    error::{Result, ScriptError},
    object::Value,
    token::Token,
};

#[derive(Debug)]
enum StackEntry {
    Operator(Operator),
    Paren { column: usize },
    Call { name: String, args: usize, column: usize },
}

/// Convert infix tokens into a postfix sequence. Error columns are token
/// positions; use [`convert_spanned`] for source columns.
pub fn convert(tokens: &[Token]) -> Result<PostfixSequence> {
    let spanned: Vec<(usize, Token)> = tokens
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, token)| (index + 1, token))
        .collect();
    convert_spanned(&spanned)
}

pub fn convert_spanned(tokens: &[(usize, Token)]) -> Result<PostfixSequence> {
    Converter::new().run(tokens)
}

struct Converter {
    output: Vec<Instruction>,
    operators: Vec<StackEntry>,
    expect_operand: bool,
    just_opened: bool,
}

impl Converter {
    fn new() -> Self {
        Self {
            output: vec![],
            operators: vec![],
            expect_operand: true,
            just_opened: false,
        }
    }

    fn run(mut self, tokens: &[(usize, Token)]) -> Result<PostfixSequence> {
        if tokens.is_empty() {
            return Err(ScriptError::EmptyExpression { line: 1 });
        }

        let mut iter = tokens.iter().peekable();
        while let Some((column, token)) = iter.next() {
            let column = *column;
            let opened = self.just_opened;
            self.just_opened = false;

            match token {
                Token::Number(value) => {
                    self.operand(column, Instruction::Push(Value::Number(*value)))?
                }
                Token::String(value) => {
                    self.operand(column, Instruction::Push(Value::Text(value.clone())))?
                }
                Token::True => self.operand(column, Instruction::Push(Value::Boolean(true)))?,
                Token::False => self.operand(column, Instruction::Push(Value::Boolean(false)))?,
                Token::Ident(name) => {
                    if matches!(iter.peek(), Some((_, Token::Lparen))) {
                        self.require_operand_position(column, token)?;
                        iter.next();
                        self.operators.push(StackEntry::Call {
                            name: name.clone(),
                            args: 0,
                            column,
                        });
                        self.just_opened = true;
                    } else {
                        self.operand(column, Instruction::Load(name.clone()))?;
                    }
                }
                Token::Lparen => {
                    self.require_operand_position(column, token)?;
                    self.operators.push(StackEntry::Paren { column });
                    self.just_opened = true;
                }
                Token::Rparen => self.close_paren(column, opened)?,
                Token::Comma => self.comma(column)?,
                Token::Minus | Token::Plus if self.expect_operand => {
                    let operator = if *token == Token::Minus {
                        Operator::Negate
                    } else {
                        Operator::Identity
                    };
                    self.operators.push(StackEntry::Operator(operator));
                }
                Token::Not => {
                    self.require_operand_position(column, token)?;
                    self.operators.push(StackEntry::Operator(Operator::Not));
                }
                _ => match binary_operator(token) {
                    Some(operator) => self.binary(column, operator)?,
                    None => {
                        return Err(syntax_error(column, format!("unexpected '{}'", token)));
                    }
                },
            }
        }

        let end_column = tokens.last().map(|(column, _)| *column).unwrap_or(1);
        if self.expect_operand {
            return Err(syntax_error(end_column, "expression ends without an operand".to_string()));
        }

        while let Some(entry) = self.operators.pop() {
            match entry {
                StackEntry::Operator(operator) => self.output.push(Instruction::Operator(operator)),
                StackEntry::Paren { column } | StackEntry::Call { column, .. } => {
                    return Err(syntax_error(
                        column,
                        "unbalanced parentheses: '(' is never closed".to_string(),
                    ));
                }
            }
        }

        let sequence = PostfixSequence::new(self.output);
        match sequence.stack_effect() {
            Ok(1) => Ok(sequence),
            Ok(depth) => Err(syntax_error(
                end_column,
                format!("operator arity mismatch: {} values left on the stack", depth),
            )),
            Err(index) => Err(syntax_error(
                end_column,
                format!("operator arity mismatch: stack underflow at postfix item {}", index),
            )),
        }
    }

    fn require_operand_position(&self, column: usize, token: &Token) -> Result<()> {
        if !self.expect_operand {
            return Err(syntax_error(column, format!("expected an operator before '{}'", token)));
        }
        Ok(())
    }

    fn operand(&mut self, column: usize, instruction: Instruction) -> Result<()> {
        if !self.expect_operand {
            return Err(syntax_error(
                column,
                format!("expected an operator before '{}'", instruction),
            ));
        }
        self.output.push(instruction);
        self.expect_operand = false;
        Ok(())
    }

    fn binary(&mut self, column: usize, incoming: Operator) -> Result<()> {
        if self.expect_operand {
            return Err(syntax_error(
                column,
                format!("operator '{}' is missing its left operand", incoming),
            ));
        }

        while let Some(&StackEntry::Operator(top)) = self.operators.last() {
            let pops = top.precedence() > incoming.precedence()
                || (top.precedence() == incoming.precedence()
                    && incoming.associativity() == Associativity::Left);
            if !pops {
                break;
            }
            self.output.push(Instruction::Operator(top));
            self.operators.pop();
        }

        self.operators.push(StackEntry::Operator(incoming));
        self.expect_operand = true;
        Ok(())
    }

    fn pop_until_group(&mut self) -> Option<StackEntry> {
        while let Some(entry) = self.operators.pop() {
            match entry {
                StackEntry::Operator(operator) => self.output.push(Instruction::Operator(operator)),
                group => return Some(group),
            }
        }
        None
    }

    fn close_paren(&mut self, column: usize, opened: bool) -> Result<()> {
        if self.expect_operand && !opened {
            return Err(syntax_error(column, "expected an operand before ')'".to_string()));
        }

        match self.pop_until_group() {
            None | Some(StackEntry::Operator(_)) => Err(syntax_error(
                column,
                "unbalanced parentheses: unmatched ')'".to_string(),
            )),
            Some(StackEntry::Paren { .. }) if opened => {
                Err(syntax_error(column, "empty parentheses".to_string()))
            }
            Some(StackEntry::Paren { .. }) => {
                self.expect_operand = false;
                Ok(())
            }
            Some(StackEntry::Call { name, args, .. }) => {
                let args = if opened { 0 } else { args + 1 };
                self.output.push(Instruction::Call { name, args });
                self.expect_operand = false;
                Ok(())
            }
        }
    }

    fn comma(&mut self, column: usize) -> Result<()> {
        if self.expect_operand {
            return Err(syntax_error(column, "missing argument before ','".to_string()));
        }

        match self.pop_until_group() {
            Some(StackEntry::Call { name, args, column: call_column }) => {
                self.operators.push(StackEntry::Call {
                    name,
                    args: args + 1,
                    column: call_column,
                });
                self.expect_operand = true;
                Ok(())
            }
            _ => Err(syntax_error(column, "misplaced ',' outside a function call".to_string())),
        }
    }
}

fn binary_operator(token: &Token) -> Option<Operator> {
    let operator = match token {
        Token::Plus => Operator::Add,
        Token::Minus => Operator::Sub,
        Token::Asterisk => Operator::Mul,
        Token::Slash => Operator::Div,
        Token::Percent => Operator::Mod,
        Token::Caret => Operator::Pow,
        Token::Lt => Operator::Lt,
        Token::LtEq => Operator::LtEq,
        Token::Gt => Operator::Gt,
        Token::GtEq => Operator::GtEq,
        Token::Eq => Operator::Eq,
        Token::NotEq => Operator::NotEq,
        Token::And => Operator::And,
        Token::Or => Operator::Or,
        _ => return None,
    };
    Some(operator)
}

fn syntax_error(column: usize, message: String) -> ScriptError {
    ScriptError::Syntax {
        line: 1,
        column,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{tokenize, tokenize_spanned};

    fn postfix(input: &str) -> Result<PostfixSequence> {
        convert_spanned(&tokenize_spanned(input)?)
    }

    fn evaluate(sequence: &PostfixSequence) -> Value {
        let mut stack: Vec<Value> = vec![];
        for instruction in sequence.instructions() {
            match instruction {
                Instruction::Push(value) => stack.push(value.clone()),
                Instruction::Operator(operator) => {
                    let operands = stack.split_off(stack.len() - operator.arity());
                    stack.push(operator.apply(&operands).unwrap());
                }
                other => panic!("unexpected instruction {}", other),
            }
        }
        assert_eq!(stack.len(), 1);
        stack.pop().unwrap()
    }

    #[test]
    fn test_arithmetic_order() {
        let tests = vec![
            ("3 + 4 * 2", "3 4 2 * +", 11.0),
            ("8 - 3 - 2", "8 3 - 2 -", 3.0),
            ("6 - 3 - 2", "6 3 - 2 -", 1.0),
            ("(3 + 4) * 2", "3 4 + 2 *", 14.0),
            ("16 / 4 / 2", "16 4 / 2 /", 2.0),
            ("2 ^ 3 ^ 2", "2 3 2 ^ ^", 512.0),
            ("50 / 2 * 2 + 10 - 5", "50 2 / 2 * 10 + 5 -", 55.0),
            ("5 * (2 + 10)", "5 2 10 + *", 60.0),
            ("-(5 + 2)", "5 2 + neg", -7.0),
            ("-2 ^ 2", "2 neg 2 ^", 4.0),
            ("2 ^ -1", "2 1 neg ^", 0.5),
            ("3 - -2", "3 2 neg -", 5.0),
            ("+4 * - - 2", "4 pos 2 neg neg *", 8.0),
            ("10 % 4 * 3", "10 4 % 3 *", 6.0),
            ("((7))", "7", 7.0),
        ];

        for (input, expected_postfix, expected_value) in tests {
            let sequence = postfix(input).unwrap();
            assert_eq!(sequence.to_string(), expected_postfix, "{}", input);
            assert_eq!(evaluate(&sequence), Value::Number(expected_value), "{}", input);
        }
    }

    #[test]
    fn test_boolean_operators() {
        let tests = vec![
            ("not a > 1 or a == 4", "a 1 > not a 4 == or"),
            ("false or true", "false true or"),
            ("a and b or c and d", "a b and c d and or"),
            ("not not x", "x not not"),
            ("x <= 1 == true", "x 1 <= true =="),
            ("1 + 2 < 3 * 4 and ok", "1 2 + 3 4 * < ok and"),
        ];

        for (input, expected) in tests {
            assert_eq!(postfix(input).unwrap().to_string(), expected, "{}", input);
        }
    }

    #[test]
    fn test_function_calls() {
        let sequence = postfix("distance_to(player) < 50").unwrap();
        assert_eq!(
            sequence.instructions(),
            &[
                Instruction::Load("player".to_string()),
                Instruction::Call {
                    name: "distance_to".to_string(),
                    args: 1
                },
                Instruction::Push(Value::Number(50.0)),
                Instruction::Operator(Operator::Lt),
            ]
        );

        let tests = vec![
            ("time()", "time/0"),
            ("max(1, 2 + 3, x)", "1 2 3 + x max/3"),
            ("distance(a * 2, min(b, 3)) - 1", "a 2 * b 3 min/2 distance/2 1 -"),
            ("-abs(-x)", "x neg abs/1 neg"),
            ("debug(\"hp \" + hp)", "\"hp \" hp + debug/1"),
        ];

        for (input, expected) in tests {
            assert_eq!(postfix(input).unwrap().to_string(), expected, "{}", input);
        }
    }

    #[test]
    fn test_syntax_errors() {
        let tests = vec![
            "(3 + 4",
            "3 + 4)",
            "3 +",
            "* 3",
            "3 4",
            "f(1,)",
            "f(,1)",
            "1, 2",
            "(1, 2)",
            "()",
            "x = 3",
            "not",
            "3 not 4",
            "f((1, 2))",
        ];

        for input in tests {
            match postfix(input) {
                Err(ScriptError::Syntax { .. }) => {}
                other => panic!("expected syntax error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_unbalanced_parentheses_report_column() {
        match postfix("(3 + 4") {
            Err(ScriptError::Syntax { column, message, .. }) => {
                assert_eq!(column, 1);
                assert!(message.contains("unbalanced"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_expression() {
        assert_eq!(convert(&[]), Err(ScriptError::EmptyExpression { line: 1 }));
        assert_eq!(
            convert(&tokenize("   ").unwrap()),
            Err(ScriptError::EmptyExpression { line: 1 })
        );
    }
}
