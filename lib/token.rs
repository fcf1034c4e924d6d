use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Ident(String),
    Number(f64),
    String(String),

    Assign,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Caret,

    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,

    And,
    Or,
    Not,

    Comma,
    Semicolon,

    Lparen,
    Rparen,
    Lbrace,
    Rbrace,

    True,
    False,
    If,
    Elseif,
    Else,
    Global,
}

impl Token {
    pub fn is_separator(&self) -> bool {
        matches!(self, Token::Semicolon | Token::Lbrace | Token::Rbrace)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Ident(ident) => write!(f, "{}", ident),
            Token::Number(value) => write!(f, "{}", value),
            Token::String(value) => write!(f, "{:?}", value),

            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Asterisk => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Caret => write!(f, "^"),

            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Eq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),

            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),

            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),

            Token::Lparen => write!(f, "("),
            Token::Rparen => write!(f, ")"),
            Token::Lbrace => write!(f, "{{"),
            Token::Rbrace => write!(f, "}}"),

            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::If => write!(f, "if"),
            Token::Elseif => write!(f, "elseif"),
            Token::Else => write!(f, "else"),
            Token::Global => write!(f, "global"),
        }
    }
}
