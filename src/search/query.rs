//! User query -> safe FTS5 MATCH expression.
//!
//! Accepted grammar (a subset of FTS5):
//!
//! ```text
//! expr    := and ( "OR" and )*
//! and     := not ( "AND"? not )*
//! not     := primary ( "NOT" primary )*
//! primary := term | "(" expr ")" | column ":" primary
//! term    := word [ "*" ] | '"' phrase '"' [ "*" ]
//! ```
//!
//! Every term is re-emitted double-quoted, so punctuation inside a word
//! (`src/main.rs`, `foo-bar`) never reaches the FTS5 parser as syntax.
//! Anything outside the grammar yields `None`.

/// Columns a filter may name. Both indexes expose a single `content` column.
const COLUMNS: &[&str] = &["content"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Term { text: String, prefix: bool },
    Column(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `content:rest` where `rest` is empty or starts a term. Any other
/// `name:` word (`std::io`, `http://host`, `file:12`) is plain text.
fn column_prefix(word: &str) -> Option<(&'static str, &str)> {
    let (name, rest) = word.split_once(':')?;
    if !is_identifier(name) {
        return None;
    }
    if rest.starts_with(':') || rest.starts_with('/') {
        return None;
    }
    let column = COLUMNS
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(name))?;
    Some((column, rest))
}

fn push_word(tokens: &mut Vec<Token>, word: &str) -> Option<()> {
    match word {
        "AND" => tokens.push(Token::And),
        "OR" => tokens.push(Token::Or),
        "NOT" => tokens.push(Token::Not),
        _ => {
            if let Some((column, rest)) = column_prefix(word) {
                tokens.push(Token::Column(column.to_string()));
                if !rest.is_empty() {
                    push_word(tokens, rest)?;
                }
                return Some(());
            }
            let (text, prefix) = match word.strip_suffix('*') {
                Some(stem) => (stem, true),
                None => (word, false),
            };
            if text.is_empty() || text.chars().all(|c| c == '*') {
                return None;
            }
            tokens.push(Token::Term {
                text: text.to_string(),
                prefix,
            });
        }
    }
    Some(())
}

fn tokenize(raw: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    let mut word = String::new();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| -> Option<()> {
        if !word.is_empty() {
            push_word(tokens, word)?;
            word.clear();
        }
        Some(())
    };

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                // A quote glued to a column prefix (`content:"a b"`) keeps the filter.
                flush(&mut word, &mut tokens)?;
                let mut phrase = String::new();
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == '"' {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            phrase.push('"');
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        phrase.push(inner);
                    }
                }
                if !closed || phrase.trim().is_empty() {
                    return None;
                }
                let prefix = chars.peek() == Some(&'*');
                if prefix {
                    chars.next();
                }
                tokens.push(Token::Term {
                    text: phrase,
                    prefix,
                });
            }
            '(' => {
                flush(&mut word, &mut tokens)?;
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut word, &mut tokens)?;
                tokens.push(Token::Close);
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens)?,
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens)?;
    Some(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn starts_primary(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Term { .. } | Token::Open | Token::Column(_))
        )
    }

    fn expr(&mut self) -> Option<String> {
        let mut out = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            out = format!("{out} OR {}", self.and()?);
        }
        Some(out)
    }

    fn and(&mut self) -> Option<String> {
        let mut out = self.not()?;
        loop {
            if self.peek() == Some(&Token::And) {
                self.bump();
                out = format!("{out} AND {}", self.not()?);
            } else if self.starts_primary() {
                out = format!("{out} {}", self.not()?);
            } else {
                return Some(out);
            }
        }
    }

    fn not(&mut self) -> Option<String> {
        let mut out = self.primary()?;
        while self.peek() == Some(&Token::Not) {
            self.bump();
            out = format!("{out} NOT {}", self.primary()?);
        }
        Some(out)
    }

    fn primary(&mut self) -> Option<String> {
        match self.bump()? {
            Token::Term { text, prefix } => {
                let quoted = format!("\"{}\"", text.replace('"', "\"\""));
                Some(if prefix { format!("{quoted}*") } else { quoted })
            }
            Token::Open => {
                let inner = self.expr()?;
                match self.bump()? {
                    Token::Close => Some(format!("({inner})")),
                    _ => None,
                }
            }
            Token::Column(column) => {
                let inner = self.primary()?;
                Some(format!("{column}:{inner}"))
            }
            Token::And | Token::Or | Token::Not | Token::Close => None,
        }
    }
}

/// Translate free text into an FTS5 MATCH expression, or `None` when the
/// input is empty or malformed.
pub fn to_fts_expression(raw: &str) -> Option<String> {
    let tokens = tokenize(raw)?;
    if tokens.is_empty() {
        return None;
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expression = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return None;
    }
    Some(expression)
}
