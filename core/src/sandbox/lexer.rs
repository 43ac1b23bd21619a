//! Tokenizer for the detector-script language.

use super::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),

    // Keywords.
    If,
    Else,
    For,
    In,
    And,
    Or,
    Not,
    Break,
    Continue,
    True,
    False,
    Null,

    // Operators and punctuation.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub line: u32,
}

fn parse_err(line: u32, message: impl Into<String>) -> SandboxError {
    SandboxError::Parse {
        line,
        message: message.into(),
    }
}

fn keyword(ident: &str) -> Option<Token> {
    Some(match ident {
        "if" => Token::If,
        "else" => Token::Else,
        "for" => Token::For,
        "in" => Token::In,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => return None,
    })
}

pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, SandboxError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    let push = |tokens: &mut Vec<SpannedToken>, token: Token, line: u32| {
        tokens.push(SpannedToken { token, line });
    };

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                // Comment to end of line.
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None | Some('\n') => {
                            return Err(parse_err(line, "unterminated string literal"))
                        }
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            other => {
                                return Err(parse_err(
                                    line,
                                    format!("unknown escape {:?}", other),
                                ))
                            }
                        },
                        Some(c) => s.push(c),
                    }
                }
                push(&mut tokens, Token::Str(s), line);
            }
            c if c.is_ascii_digit() => {
                let mut raw = String::new();
                let mut seen_dot = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        raw.push(c);
                        chars.next();
                    } else if c == '.' && !seen_dot {
                        // A dot must be followed by a digit to be part of the
                        // number; otherwise it is field access (e.g. 1.foo is
                        // invalid anyway, but "x[0].y" must not eat the dot).
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        match lookahead.peek() {
                            Some(d) if d.is_ascii_digit() => {
                                seen_dot = true;
                                raw.push('.');
                                chars.next();
                            }
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                let value: f64 = raw
                    .parse()
                    .map_err(|_| parse_err(line, format!("invalid number '{raw}'")))?;
                push(&mut tokens, Token::Number(value), line);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = keyword(&ident).unwrap_or(Token::Ident(ident));
                push(&mut tokens, token, line);
            }
            _ => {
                chars.next();
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    ':' => Token::Colon,
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::EqEq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::NotEq
                        } else {
                            return Err(parse_err(line, "unexpected '!' (use 'not')"));
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::LtEq
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::GtEq
                        } else {
                            Token::Gt
                        }
                    }
                    other => {
                        return Err(parse_err(line, format!("unexpected character {other:?}")))
                    }
                };
                push(&mut tokens, token, line);
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_assignment_and_comparison() {
        let tokens = tokenize("x = a.b >= 1.5  # trailing comment\n").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::GtEq,
                Token::Number(1.5),
            ]
        );
    }

    #[test]
    fn dot_after_integer_is_field_access() {
        let tokens = tokenize("xs[0].qty").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("xs".into()),
                Token::LBracket,
                Token::Number(0.0),
                Token::RBracket,
                Token::Dot,
                Token::Ident("qty".into()),
            ]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(
            tokenize("s = \"oops"),
            Err(SandboxError::Parse { .. })
        ));
    }

    #[test]
    fn tracks_line_numbers() {
        let tokens = tokenize("a = 1\n\nb = 2").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[3].line, 3);
    }
}
