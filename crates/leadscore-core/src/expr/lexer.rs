//! Tokenizer for the rule and formula language.

use crate::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// `{name}` with the braces stripped.
    Field(String),
    Ident(String),
    And,
    Or,
    Not,
    True,
    False,
    If,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LParen,
    RParen,
    Comma,
    Eof,
}

impl Token {
    /// Human-readable form used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Field(f) => format!("field {{{f}}}"),
            Token::Ident(i) => format!("'{i}'"),
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Not => "'not'".into(),
            Token::True => "'true'".into(),
            Token::False => "'false'".into(),
            Token::If => "'if'".into(),
            Token::Eq => "'=='".into(),
            Token::Ne => "'!='".into(),
            Token::Gt => "'>'".into(),
            Token::Lt => "'<'".into(),
            Token::Ge => "'>='".into(),
            Token::Le => "'<='".into(),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::StarStar => "'**'".into(),
            Token::Slash => "'/'".into(),
            Token::SlashSlash => "'//'".into(),
            Token::Percent => "'%'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
            Token::Eof => "end of expression".into(),
        }
    }
}

/// A token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Returns `true` if `name` is a valid field or function identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `source` into tokens. The result always ends with [`Token::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|&(_, c)| c);

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, consumed) = match c {
            '0'..='9' | '.' => {
                let start = i;
                let mut end = i;
                let mut seen_dot = false;
                while let Some(ch) = peek(end) {
                    if ch.is_ascii_digit() {
                        end += 1;
                    } else if ch == '.' && !seen_dot {
                        seen_dot = true;
                        end += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..end].iter().map(|&(_, ch)| ch).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| SyntaxError::new(pos, format!("invalid number '{text}'")))?;
                (Token::Number(value), end - start)
            }

            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                let mut end = i + 1;
                loop {
                    match peek(end) {
                        None => return Err(SyntaxError::new(pos, "unterminated string literal")),
                        Some('\\') => {
                            match peek(end + 1) {
                                Some(escaped) => value.push(escaped),
                                None => {
                                    return Err(SyntaxError::new(
                                        pos,
                                        "unterminated string literal",
                                    ))
                                }
                            }
                            end += 2;
                        }
                        Some(ch) if ch == quote => {
                            end += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(ch);
                            end += 1;
                        }
                    }
                }
                (Token::Str(value), end - i)
            }

            '{' => {
                let mut end = i + 1;
                let mut name = String::new();
                loop {
                    match peek(end) {
                        None => return Err(SyntaxError::new(pos, "unterminated field reference")),
                        Some('}') => {
                            end += 1;
                            break;
                        }
                        Some(ch) => {
                            name.push(ch);
                            end += 1;
                        }
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(SyntaxError::new(pos, "empty field reference"));
                }
                if !is_identifier(name) {
                    return Err(SyntaxError::new(
                        pos,
                        format!("invalid field name '{name}'"),
                    ));
                }
                (Token::Field(name.to_string()), end - i)
            }

            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(ch) = peek(end) {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        end += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..end].iter().map(|&(_, ch)| ch).collect();
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "if" => Token::If,
                    _ => Token::Ident(word),
                };
                (token, end - start)
            }

            '=' if peek(i + 1) == Some('=') => (Token::Eq, 2),
            '!' if peek(i + 1) == Some('=') => (Token::Ne, 2),
            '>' if peek(i + 1) == Some('=') => (Token::Ge, 2),
            '<' if peek(i + 1) == Some('=') => (Token::Le, 2),
            '*' if peek(i + 1) == Some('*') => (Token::StarStar, 2),
            '/' if peek(i + 1) == Some('/') => (Token::SlashSlash, 2),
            '>' => (Token::Gt, 1),
            '<' => (Token::Lt, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            '=' => {
                return Err(SyntaxError::new(
                    pos,
                    "unknown operator '='; use '==' for equality",
                ))
            }
            other => {
                return Err(SyntaxError::new(
                    pos,
                    format!("unknown operator '{other}'"),
                ))
            }
        };

        tokens.push(Spanned {
            token,
            position: pos,
        });
        i += consumed;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: source.len(),
    });
    Ok(tokens)
}
