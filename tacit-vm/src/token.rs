//! Tokenizer (spec.md section 4.5). No teacher analog — `fuel-vm` never
//! lexes source text, it decodes pre-assembled binary instructions — so
//! this is written directly from the spec's token contract.

use tacit_types::error::{VmError, VmResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f32),
    Word(String),
    String(String),
    Special(String),
    /// Apostrophe-prefixed symbol, e.g. `'foo`.
    RefSigil(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

const SPECIALS_TWO_CHAR: [&str; 2] = [":[", "]:"];
const SPECIALS_ONE_CHAR: &str = ":;[](){}";

fn is_special_start(c: char) -> bool {
    SPECIALS_ONE_CHAR.contains(c)
}

/// Produces a finite token stream from source text, with one-token
/// pushback (spec.md section 4.5).
pub struct Tokenizer<'a> {
    src: &'a [u8],
    pos: usize,
    pushback: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Tokenizer { src: src.as_bytes(), pos: 0, pushback: None }
    }

    pub fn push_back(&mut self, tok: Token) {
        debug_assert!(self.pushback.is_none(), "only one token of pushback is supported");
        self.pushback = Some(tok);
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b) if (b as char).is_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some(b'/') && self.src.get(self.pos + 1) == Some(&b'/') {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    pub fn next_token(&mut self) -> VmResult<Token> {
        if let Some(tok) = self.pushback.take() {
            return Ok(tok);
        }
        self.skip_whitespace_and_comments();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, pos: start });
        };

        if c == b'"' {
            return self.lex_string(start);
        }
        if c == b'\'' {
            return self.lex_ref_sigil(start);
        }
        if is_special_start(c as char) {
            return self.lex_special(start);
        }
        if c == b'-' || (c as char).is_ascii_digit() {
            if let Some(tok) = self.try_lex_number(start) {
                return Ok(tok);
            }
        }
        self.lex_word(start)
    }

    fn lex_special(&mut self, start: usize) -> VmResult<Token> {
        let two: String = self.src[self.pos..(self.pos + 2).min(self.src.len())]
            .iter()
            .map(|&b| b as char)
            .collect();
        if SPECIALS_TWO_CHAR.contains(&two.as_str()) {
            self.pos += 2;
            return Ok(Token { kind: TokenKind::Special(two), pos: start });
        }
        let c = self.bump().unwrap() as char;
        Ok(Token { kind: TokenKind::Special(c.to_string()), pos: start })
    }

    fn lex_string(&mut self, start: usize) -> VmResult<Token> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(VmError::Syntax {
                        pos: start,
                        detail: "unterminated string literal".into(),
                    })
                }
                Some(b'"') => break,
                Some(b'\\') => {
                    let esc = self.bump().ok_or_else(|| VmError::Syntax {
                        pos: start,
                        detail: "unterminated escape in string literal".into(),
                    })?;
                    s.push(match esc {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        b'"' => '"',
                        b'\\' => '\\',
                        other => {
                            return Err(VmError::Syntax {
                                pos: start,
                                detail: format!("unknown string escape \\{}", other as char),
                            })
                        }
                    });
                }
                Some(b) => s.push(b as char),
            }
        }
        Ok(Token { kind: TokenKind::String(s), pos: start })
    }

    fn lex_ref_sigil(&mut self, start: usize) -> VmResult<Token> {
        self.bump(); // apostrophe
        let name_start = self.pos;
        while matches!(self.peek(), Some(b) if !(b as char).is_whitespace() && !is_special_start(b as char))
        {
            self.pos += 1;
        }
        if self.pos == name_start {
            return Err(VmError::Syntax { pos: start, detail: "empty ref sigil".into() });
        }
        let name = std::str::from_utf8(&self.src[name_start..self.pos]).unwrap().to_string();
        Ok(Token { kind: TokenKind::RefSigil(name), pos: start })
    }

    fn try_lex_number(&mut self, start: usize) -> Option<Token> {
        let save = self.pos;
        let mut end = self.pos;
        if self.src.get(end) == Some(&b'-') {
            end += 1;
        }
        let digits_start = end;
        while matches!(self.src.get(end), Some(b) if (*b as char).is_ascii_digit()) {
            end += 1;
        }
        if end == digits_start {
            self.pos = save;
            return None;
        }
        if self.src.get(end) == Some(&b'.')
            && matches!(self.src.get(end + 1), Some(b) if (*b as char).is_ascii_digit())
        {
            end += 1;
            while matches!(self.src.get(end), Some(b) if (*b as char).is_ascii_digit()) {
                end += 1;
            }
        }
        // A number must not be immediately followed by more word characters
        // (e.g. `1a` is a WORD, not a NUMBER followed by garbage).
        if matches!(self.src.get(end), Some(b) if !(*b as char).is_whitespace() && !is_special_start(*b as char))
        {
            self.pos = save;
            return None;
        }
        let text = std::str::from_utf8(&self.src[start..end]).unwrap();
        let value: f32 = text.parse().ok()?;
        self.pos = end;
        Some(Token { kind: TokenKind::Number(value), pos: start })
    }

    fn lex_word(&mut self, start: usize) -> VmResult<Token> {
        while matches!(self.peek(), Some(b) if !(b as char).is_whitespace() && !is_special_start(b as char) && b != b'"')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(VmError::Syntax {
                pos: start,
                detail: format!("unexpected character '{}'", self.peek().unwrap() as char),
            });
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        Ok(Token { kind: TokenKind::Word(text), pos: start })
    }
}
