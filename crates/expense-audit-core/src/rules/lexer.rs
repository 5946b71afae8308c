//! Tokenizer for the rule expression language

use super::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Ident(name) => format!("identifier `{}`", name),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::And => "&&",
            TokenKind::Or => "||",
            TokenKind::Not => "!",
            TokenKind::In => "in",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub position: usize,
}

/// Split rule source into tokens, ending with `Eof`
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).map(|&(_, c)| c);
        let simple = match c {
            '(' => Some((TokenKind::LParen, 1)),
            ')' => Some((TokenKind::RParen, 1)),
            '[' => Some((TokenKind::LBracket, 1)),
            ']' => Some((TokenKind::RBracket, 1)),
            ',' => Some((TokenKind::Comma, 1)),
            '+' => Some((TokenKind::Plus, 1)),
            '-' => Some((TokenKind::Minus, 1)),
            '*' => Some((TokenKind::Star, 1)),
            '/' => Some((TokenKind::Slash, 1)),
            '%' => Some((TokenKind::Percent, 1)),
            '=' if peek == Some('=') => Some((TokenKind::Eq, 2)),
            '!' if peek == Some('=') => Some((TokenKind::Ne, 2)),
            '!' => Some((TokenKind::Not, 1)),
            '<' if peek == Some('=') => Some((TokenKind::Le, 2)),
            '<' => Some((TokenKind::Lt, 1)),
            '>' if peek == Some('=') => Some((TokenKind::Ge, 2)),
            '>' => Some((TokenKind::Gt, 1)),
            '&' if peek == Some('&') => Some((TokenKind::And, 2)),
            '|' if peek == Some('|') => Some((TokenKind::Or, 2)),
            _ => None,
        };

        let (kind, width) = match simple {
            Some(token) => token,
            None if c == '"' || c == '\'' => {
                let (value, consumed) = read_string(&chars, i, c)?;
                (TokenKind::Str(value), consumed)
            }
            None if c.is_ascii_digit() => {
                let (value, consumed) = read_number(source, &chars, i)?;
                (TokenKind::Number(value), consumed)
            }
            None if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].1.is_alphanumeric() || chars[end].1 == '_') {
                    end += 1;
                }
                let word: String = chars[i..end].iter().map(|&(_, c)| c).collect();
                let kind = match word.as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "in" => TokenKind::In,
                    _ => TokenKind::Ident(word),
                };
                (kind, end - i)
            }
            None => {
                return Err(CompileError::new(format!("unexpected character '{}'", c), pos));
            }
        };

        tokens.push(Token { kind, position: pos });
        i += width;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

fn read_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), CompileError> {
    let mut value = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let (_, c) = chars[i];
        if c == quote {
            return Ok((value, i + 1 - start));
        }
        if c == '\\' {
            let (pos, escaped) = chars
                .get(i + 1)
                .copied()
                .ok_or_else(|| CompileError::new("unterminated escape sequence", chars[i].0))?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                other => {
                    return Err(CompileError::new(format!("unknown escape '\\{}'", other), pos));
                }
            });
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }

    Err(CompileError::new("unterminated string literal", chars[start].0))
}

fn read_number(source: &str, chars: &[(usize, char)], start: usize) -> Result<(f64, usize), CompileError> {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() {
        let c = chars[end].1;
        if c.is_ascii_digit() || c == '_' {
            end += 1;
        } else if c == '.' && !seen_dot && chars.get(end + 1).map_or(false, |&(_, n)| n.is_ascii_digit()) {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }

    let from = chars[start].0;
    let to = chars.get(end).map_or(source.len(), |&(p, _)| p);
    let text: String = source[from..to].chars().filter(|&c| c != '_').collect();
    text.parse::<f64>()
        .map(|value| (value, end - start))
        .map_err(|_| CompileError::new(format!("invalid number '{}'", text), from))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("amount <= 2_000.50"),
            vec![
                TokenKind::Ident("amount".to_string()),
                TokenKind::Le,
                TokenKind::Number(2000.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords_and_symbols() {
        assert_eq!(
            kinds("not a and b or c && !d || e"),
            vec![
                TokenKind::Not,
                TokenKind::Ident("a".to_string()),
                TokenKind::And,
                TokenKind::Ident("b".to_string()),
                TokenKind::Or,
                TokenKind::Ident("c".to_string()),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Ident("d".to_string()),
                TokenKind::Or,
                TokenKind::Ident("e".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b""#),
            vec![
                TokenKind::Str("it's".to_string()),
                TokenKind::Str("a\"b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        let tokens = tokenize("差旅 == 1").unwrap();
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[1].position, 7);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("vendor == 'abc").unwrap_err();
        assert_eq!(err.position, 10);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_single_ampersand_rejected() {
        let err = tokenize("a & b").unwrap_err();
        assert!(err.message.contains("unexpected character '&'"));
        assert_eq!(err.position, 2);
    }
}
