use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::{
    error::{Result, ScriptError},
    token::Token,
};

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, Token> = HashMap::from([
        ("and", Token::And),
        ("or", Token::Or),
        ("not", Token::Not),
        ("true", Token::True),
        ("false", Token::False),
        ("if", Token::If),
        ("elseif", Token::Elseif),
        ("else", Token::Else),
        ("global", Token::Global),
    ]);
}

pub fn tokenize(source_line: &str) -> Result<Vec<Token>> {
    Ok(tokenize_spanned(source_line)?
        .into_iter()
        .map(|(_, token)| token)
        .collect())
}

pub fn tokenize_spanned(source_line: &str) -> Result<Vec<(usize, Token)>> {
    let mut lexer = Lexer::new(source_line);
    let mut tokens = vec![];
    while let Some(spanned) = lexer.next_token()? {
        tokens.push(spanned);
    }
    Ok(tokens)
}

pub struct Lexer {
    chars: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            position: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Option<(usize, Token)>> {
        while self.char().is_some_and(|char| char.is_whitespace()) {
            self.read_char();
        }

        let column = self.position + 1;
        let char = match self.char() {
            Some('#') | None => {
                // comment runs to the end of the line
                self.position = self.chars.len();
                return Ok(None);
            }
            Some(char) => char,
        };

        let token = match char {
            '=' if self.is_next_char('=') => self.read_two(Token::Eq),
            '=' => self.read_one(Token::Assign),
            '!' if self.is_next_char('=') => self.read_two(Token::NotEq),
            '<' if self.is_next_char('=') => self.read_two(Token::LtEq),
            '<' => self.read_one(Token::Lt),
            '>' if self.is_next_char('=') => self.read_two(Token::GtEq),
            '>' => self.read_one(Token::Gt),
            '+' => self.read_one(Token::Plus),
            '-' => self.read_one(Token::Minus),
            '*' => self.read_one(Token::Asterisk),
            '/' => self.read_one(Token::Slash),
            '%' => self.read_one(Token::Percent),
            '^' => self.read_one(Token::Caret),
            ',' => self.read_one(Token::Comma),
            ';' => self.read_one(Token::Semicolon),
            '(' => self.read_one(Token::Lparen),
            ')' => self.read_one(Token::Rparen),
            '{' => self.read_one(Token::Lbrace),
            '}' => self.read_one(Token::Rbrace),
            '"' => self.read_string(column)?,
            _ if char.is_ascii_digit() => self.read_number(column)?,
            _ if char.is_alphabetic() || char == '_' => {
                let literal =
                    self.read_while(|char| char.is_alphanumeric() || char == '_' || char == '.');
                KEYWORDS
                    .get(literal.as_str())
                    .cloned()
                    .unwrap_or(Token::Ident(literal))
            }
            _ => return Err(lex_error(column, format!("unrecognized character '{}'", char))),
        };

        Ok(Some((column, token)))
    }

    fn char(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn read_char(&mut self) {
        self.position += 1;
    }

    fn is_next_char(&self, ch: char) -> bool {
        self.chars.get(self.position + 1).eq(&Some(&ch))
    }

    fn is_digit_at(&self, offset: usize) -> bool {
        self.chars
            .get(self.position + offset)
            .is_some_and(|char| char.is_ascii_digit())
    }

    fn read_one(&mut self, token: Token) -> Token {
        self.read_char();
        token
    }

    fn read_two(&mut self, token: Token) -> Token {
        self.position += 2;
        token
    }

    fn read_while(&mut self, condition: impl Fn(char) -> bool) -> String {
        let mut literal = String::new();
        while let Some(char) = self.char() {
            if !condition(char) {
                break;
            }
            literal.push(char);
            self.read_char();
        }
        literal
    }

    fn read_number(&mut self, column: usize) -> Result<Token> {
        let mut literal = self.read_while(|char| char.is_ascii_digit());

        if self.char() == Some('.') && self.is_digit_at(1) {
            self.read_char();
            literal.push('.');
            literal.push_str(&self.read_while(|char| char.is_ascii_digit()));
        }

        if matches!(self.char(), Some('e') | Some('E')) {
            let signed = matches!(self.chars.get(self.position + 1), Some('+') | Some('-'));
            if self.is_digit_at(1) || (signed && self.is_digit_at(2)) {
                literal.push('e');
                self.read_char();
                if signed {
                    literal.push(self.char().unwrap_or('+'));
                    self.read_char();
                }
                literal.push_str(&self.read_while(|char| char.is_ascii_digit()));
            }
        }

        literal
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|err| lex_error(column, format!("invalid number '{}': {}", literal, err)))
    }

    fn read_string(&mut self, column: usize) -> Result<Token> {
        // skip the opening quote
        self.read_char();
        let mut literal = String::new();
        loop {
            match self.char() {
                None => return Err(lex_error(column, "unterminated string literal".to_string())),
                Some('"') => {
                    self.read_char();
                    return Ok(Token::String(literal));
                }
                Some('\\') => {
                    self.read_char();
                    match self.char() {
                        Some('"') => literal.push('"'),
                        Some('\\') => literal.push('\\'),
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some(other) => {
                            literal.push('\\');
                            literal.push(other);
                        }
                        None => {
                            return Err(lex_error(column, "unterminated string literal".to_string()))
                        }
                    }
                    self.read_char();
                }
                Some(char) => {
                    literal.push(char);
                    self.read_char();
                }
            }
        }
    }
}

fn lex_error(column: usize, message: String) -> ScriptError {
    ScriptError::Lex {
        line: 1,
        column,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexer() {
        let input = r#"speed = 4.5 * (x_pos.y - 10) ^ 2e1 % 3;
            if not (hp <= 0 or lives >= 3) and name != "ba\"d" == true {
            } elseif false { } else { global g = distance_to(player, 1) > 50 < 2 }"#;

        let expected = vec![
            Token::Ident("speed".to_string()),
            Token::Assign,
            Token::Number(4.5),
            Token::Asterisk,
            Token::Lparen,
            Token::Ident("x_pos.y".to_string()),
            Token::Minus,
            Token::Number(10.0),
            Token::Rparen,
            Token::Caret,
            Token::Number(20.0),
            Token::Percent,
            Token::Number(3.0),
            Token::Semicolon,
            Token::If,
            Token::Not,
            Token::Lparen,
            Token::Ident("hp".to_string()),
            Token::LtEq,
            Token::Number(0.0),
            Token::Or,
            Token::Ident("lives".to_string()),
            Token::GtEq,
            Token::Number(3.0),
            Token::Rparen,
            Token::And,
            Token::Ident("name".to_string()),
            Token::NotEq,
            Token::String("ba\"d".to_string()),
            Token::Eq,
            Token::True,
            Token::Lbrace,
            Token::Rbrace,
            Token::Elseif,
            Token::False,
            Token::Lbrace,
            Token::Rbrace,
            Token::Else,
            Token::Lbrace,
            Token::Global,
            Token::Ident("g".to_string()),
            Token::Assign,
            Token::Ident("distance_to".to_string()),
            Token::Lparen,
            Token::Ident("player".to_string()),
            Token::Comma,
            Token::Number(1.0),
            Token::Rparen,
            Token::Gt,
            Token::Number(50.0),
            Token::Lt,
            Token::Number(2.0),
            Token::Rbrace,
        ];

        let tokens = tokenize(input).unwrap();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_numbers() {
        let tests = vec![
            ("42", 42.0),
            ("3.25", 3.25),
            ("1e3", 1000.0),
            ("2.5E-1", 0.25),
        ];

        for (input, expected) in tests {
            assert_eq!(tokenize(input).unwrap(), vec![Token::Number(expected)]);
        }

        // a trailing dot is not part of the number
        assert!(tokenize("3.").is_err());
    }

    #[test]
    fn test_comments_and_whitespace() {
        assert_eq!(tokenize("   # nothing to see").unwrap(), vec![]);
        assert_eq!(
            tokenize("x = 1 # set x").unwrap(),
            vec![
                Token::Ident("x".to_string()),
                Token::Assign,
                Token::Number(1.0)
            ]
        );
        assert_eq!(
            tokenize(r##""# not a comment""##).unwrap(),
            vec![Token::String("# not a comment".to_string())]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""line\nnext \\ tab\t""#).unwrap();
        assert_eq!(tokens, vec![Token::String("line\nnext \\ tab\t".to_string())]);
    }

    #[test]
    fn test_lex_errors() {
        let tests = vec![
            (r#"x = "open"#, 5, "unterminated string literal"),
            ("x = 3 @ 4", 7, "unrecognized character '@'"),
            ("a ! b", 3, "unrecognized character '!'"),
        ];

        for (input, expected_column, expected_message) in tests {
            match tokenize(input) {
                Err(ScriptError::Lex {
                    column, message, ..
                }) => {
                    assert_eq!(column, expected_column, "{}", input);
                    assert_eq!(message, expected_message);
                }
                other => panic!("expected lex error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_spans() {
        let spanned = tokenize_spanned("ab + 12").unwrap();
        let columns: Vec<usize> = spanned.iter().map(|(column, _)| *column).collect();
        assert_eq!(columns, vec![1, 4, 6]);
    }
}
