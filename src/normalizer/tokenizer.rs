//! Lexer for T-SQL text, just detailed enough to walk `FROM`/`JOIN` clauses.
//!
//! Every byte of the input belongs to exactly one token, so concatenating token
//! texts reproduces the input.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word, including `@var`, `#temp` and numbers.
    Word,
    /// `[identifier]`, with `]]` as an escaped `]`.
    Bracketed,
    /// `"identifier"`, with `""` as an escaped `"`.
    Quoted,
    StringLiteral,
    Comment,
    Whitespace,
    Dot,
    Comma,
    OpenParen,
    CloseParen,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Bracketed | TokenKind::Quoted)
    }

    /// Case-insensitive keyword test. Only bare words can be keywords.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Identifier value with quoting removed and escapes resolved.
    pub fn identifier(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_string()),
            TokenKind::Bracketed => Some(unwrap_quoted(self.text, '[', ']').replace("]]", "]")),
            TokenKind::Quoted => Some(unwrap_quoted(self.text, '"', '"').replace("\"\"", "\"")),
            _ => None,
        }
    }
}

fn unwrap_quoted(text: &str, open: char, close: char) -> &str {
    let inner = text.strip_prefix(open).unwrap_or(text);
    inner.strip_suffix(close).unwrap_or(inner)
}

pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(c) = input[pos..].chars().next() {
        let rest = &input[pos..];
        let (kind, len) = if c.is_whitespace() {
            (TokenKind::Whitespace, span_while(rest, char::is_whitespace))
        } else if rest.starts_with("--") {
            (TokenKind::Comment, rest.find('\n').unwrap_or(rest.len()))
        } else if rest.starts_with("/*") {
            (TokenKind::Comment, rest[2..].find("*/").map(|i| i + 4).unwrap_or(rest.len()))
        } else if c == '[' {
            (TokenKind::Bracketed, delimited_len(rest, ']'))
        } else if c == '"' {
            (TokenKind::Quoted, delimited_len(rest, '"'))
        } else if c == '\'' {
            (TokenKind::StringLiteral, delimited_len(rest, '\''))
        } else if is_word_char(c) {
            (TokenKind::Word, span_while(rest, is_word_char))
        } else {
            let kind = match c {
                '.' => TokenKind::Dot,
                ',' => TokenKind::Comma,
                '(' => TokenKind::OpenParen,
                ')' => TokenKind::CloseParen,
                _ => TokenKind::Other,
            };
            (kind, c.len_utf8())
        };

        tokens.push(Token {
            kind,
            text: &rest[..len],
        });
        pos += len;
    }

    tokens
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '$')
}

fn span_while(text: &str, pred: impl Fn(char) -> bool) -> usize {
    text.char_indices()
        .find(|(_, c)| !pred(*c))
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Length of a token opened by `text`'s first char and closed by `close`,
/// where a doubled `close` is an escape. Unterminated runs to the end.
fn delimited_len(text: &str, close: char) -> usize {
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == close {
            if let Some(&(_, next)) = chars.peek() {
                if next == close {
                    chars.next();
                    continue;
                }
            }
            return i + c.len_utf8();
        }
    }
    text.len()
}
