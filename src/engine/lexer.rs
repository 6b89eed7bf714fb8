use super::Dialect;
use super::ast::Pos;
use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Elif,
    Else,
    Loop,
    Break,
    Continue,
    Return,
    Each,
    For,
    Let,
    Var,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Num(f64),
    Str(String),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    At,
    /// `<:`
    Out,
    /// `###`
    Meta,
    /// `#` (legacy immutable definition)
    Hash,
    /// `$` (legacy mutable definition)
    Dollar,
    /// `<-` (legacy assignment)
    LeftArrow,
    Assign,
    PlusAssign,
    MinusAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::Num(_) => "number".to_string(),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Keyword(kw) => format!("keyword `{kw:?}`").to_lowercase(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::At => "@",
            TokenKind::Out => "<:",
            TokenKind::Meta => "###",
            TokenKind::Hash => "#",
            TokenKind::Dollar => "$",
            TokenKind::LeftArrow => "<-",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

pub struct Lexer<'a> {
    dialect: Dialect,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
    saw_newline: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, dialect: Dialect) -> Self {
        Self {
            dialect,
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            saw_newline: false,
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
            self.saw_newline = true;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> EngineResult<()> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(EngineError::syntax("unterminated comment", start));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn tokenize(mut self) -> EngineResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let newline_before = std::mem::take(&mut self.saw_newline);
            let pos = self.pos();
            let Some(ch) = self.bump() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                    newline_before,
                });
                return Ok(tokens);
            };

            let kind = match ch {
                c if is_ident_start(c) => self.identifier(c),
                c if c.is_ascii_digit() => self.number(c, pos)?,
                '"' => self.string(pos)?,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                '@' => TokenKind::At,
                '+' if self.dialect == Dialect::Modern && self.eat('=') => TokenKind::PlusAssign,
                '+' => TokenKind::Plus,
                '-' if self.dialect == Dialect::Modern && self.eat('=') => TokenKind::MinusAssign,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '!' if self.eat('=') => TokenKind::BangEq,
                '!' => TokenKind::Bang,
                '=' if self.eat('=') => TokenKind::EqEq,
                '=' => TokenKind::Assign,
                '<' if self.eat(':') => TokenKind::Out,
                '<' if self.eat('=') => TokenKind::Le,
                '<' if self.dialect == Dialect::Legacy && self.eat('-') => TokenKind::LeftArrow,
                '<' => TokenKind::Lt,
                '>' if self.eat('=') => TokenKind::Ge,
                '>' => TokenKind::Gt,
                '&' if self.eat('&') => TokenKind::AndAnd,
                '|' if self.eat('|') => TokenKind::OrOr,
                '#' if self.peek() == Some('#') && self.peek_second() == Some('#') => {
                    self.bump();
                    self.bump();
                    TokenKind::Meta
                }
                '#' if self.dialect == Dialect::Legacy => TokenKind::Hash,
                '$' if self.dialect == Dialect::Legacy => TokenKind::Dollar,
                other => {
                    return Err(EngineError::syntax(
                        format!("unexpected character '{other}'"),
                        pos,
                    ));
                }
            };
            // Line breaks inside a string literal do not separate statements.
            self.saw_newline = false;
            tokens.push(Token {
                kind,
                pos,
                newline_before,
            });
        }
    }

    fn identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::from(first);
        self.take_ident_chars(&mut name);

        // `Core:type` style namespaces: an uppercase segment glued to `:`.
        while name
            .rsplit(':')
            .next()
            .and_then(|segment| segment.chars().next())
            .is_some_and(|c| c.is_ascii_uppercase())
            && self.peek() == Some(':')
            && self.peek_second().is_some_and(is_ident_start)
        {
            self.bump();
            name.push(':');
            self.take_ident_chars(&mut name);
        }

        match self.dialect.keyword(&name) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(name),
        }
    }

    fn take_ident_chars(&mut self, buf: &mut String) {
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                buf.push(ch);
                self.bump();
            } else {
                break;
            }
        }
    }

    fn number(&mut self, first: char, pos: Pos) -> EngineResult<TokenKind> {
        let mut text = String::from(first);
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Num)
            .map_err(|_| EngineError::syntax(format!("invalid number literal `{text}`"), pos))
    }

    fn string(&mut self, pos: Pos) -> EngineResult<TokenKind> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                    None => break,
                },
                Some(ch) => value.push(ch),
                None => break,
            }
        }
        Err(EngineError::syntax("unterminated string literal", pos))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
