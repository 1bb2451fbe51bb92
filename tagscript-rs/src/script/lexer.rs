//! Script text → flat statement list.
//!
//! Rules, in priority order while scanning outside quotes:
//!
//! - `//` to end of line and `/* … */` are comments and vanish.
//! - `"…"` / `'…'` quote; everything inside is literal, the quote characters
//!   themselves stay in the statement text for the entry tokenizer.
//! - `<{ … }>` is hoisted into a nested script and replaced by a
//!   `<function[name]>` tag.
//! - `;` and newline end a statement, unless the next line starts with `|`
//!   (continuation; the `|` becomes a space).
//! - `{` and `}` are emitted as their own statements.

use crate::error::ScriptError;

/// One statement and the line its first character sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub line: usize,
}

impl Statement {
    pub fn is_open_brace(&self) -> bool {
        self.text == "{"
    }

    pub fn is_close_brace(&self) -> bool {
        self.text == "}"
    }
}

/// The body of a `<{ … }>` region, compiled as its own script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoistedScript {
    pub name: String,
    pub source: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexed {
    pub statements: Vec<Statement>,
    pub hoisted: Vec<HoistedScript>,
}

/// Lex a whole script starting at line 1.
pub fn lex(script: &str, src: &str) -> Result<Lexed, ScriptError> {
    lex_from(script, src, 1)
}

/// Lex a script whose first character sits on `first_line` (hoisted bodies).
pub fn lex_from(script: &str, src: &str, first_line: usize) -> Result<Lexed, ScriptError> {
    let lexer = Lexer {
        script,
        chars: src.chars().collect(),
        pos: 0,
        line: first_line,
        current: String::new(),
        current_line: first_line,
        out: Lexed::default(),
    };
    lexer.run()
}

struct Lexer<'a> {
    script: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    current: String,
    current_line: usize,
    out: Lexed,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Lexed, ScriptError> {
        while let Some(ch) = self.peek(0) {
            match ch {
                '"' | '\'' => self.read_quoted(ch)?,
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment()?,
                '<' if self.peek(1) == Some('{') => self.hoist()?,
                ';' => {
                    self.pos += 1;
                    self.flush();
                }
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    if !self.continuation() {
                        self.flush();
                    }
                }
                '{' | '}' => {
                    self.pos += 1;
                    self.flush();
                    self.out.statements.push(Statement {
                        text: ch.to_string(),
                        line: self.line,
                    });
                }
                '\r' => self.pos += 1,
                _ => {
                    self.pos += 1;
                    self.push(ch);
                }
            }
        }
        self.flush();
        Ok(self.out)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, ch: char) {
        if self.current.is_empty() {
            if ch.is_whitespace() {
                return;
            }
            self.current_line = self.line;
        }
        self.current.push(ch);
    }

    fn push_str(&mut self, s: &str) {
        for ch in s.chars() {
            self.push(ch);
        }
    }

    fn flush(&mut self) {
        let text = self.current.trim_end();
        if !text.is_empty() {
            self.out.statements.push(Statement {
                text: text.to_owned(),
                line: self.current_line,
            });
        }
        self.current.clear();
    }

    /// Called just after a newline: if the next non-blank character is `|`,
    /// consume it and keep the current statement open.
    fn continuation(&mut self) -> bool {
        let mut look = self.pos;
        while matches!(self.chars.get(look), Some(' ' | '\t')) {
            look += 1;
        }
        if self.chars.get(look) != Some(&'|') {
            return false;
        }
        self.pos = look + 1;
        if !self.current.is_empty() {
            self.current.push(' ');
        }
        true
    }

    fn read_quoted(&mut self, quote: char) -> Result<(), ScriptError> {
        let start_line = self.line;
        self.push(quote);
        self.pos += 1;
        loop {
            let Some(ch) = self.peek(0) else {
                return Err(ScriptError::syntax(self.script, start_line, "unterminated quote"));
            };
            self.pos += 1;
            if ch == '\n' {
                self.line += 1;
            }
            self.current.push(ch);
            if ch == quote {
                return Ok(());
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek(0) {
            if ch == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ScriptError> {
        let start_line = self.line;
        self.pos += 2;
        loop {
            match self.peek(0) {
                None => {
                    return Err(ScriptError::syntax(
                        self.script,
                        start_line,
                        "unterminated block comment",
                    ))
                }
                Some('*') if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Cut a `<{ … }>` region out into a nested script.
    fn hoist(&mut self) -> Result<(), ScriptError> {
        let start_line = self.line;
        self.pos += 2;
        let mut body = String::new();
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        loop {
            let Some(ch) = self.peek(0) else {
                return Err(ScriptError::syntax(
                    self.script,
                    start_line,
                    "unterminated '<{' region",
                ));
            };
            if ch == '\n' {
                self.line += 1;
            }
            match quote {
                Some(q) => {
                    if ch == q {
                        quote = None;
                    }
                }
                None => match ch {
                    '"' | '\'' => quote = Some(ch),
                    '<' if self.peek(1) == Some('{') => {
                        depth += 1;
                        body.push_str("<{");
                        self.pos += 2;
                        continue;
                    }
                    '}' if self.peek(1) == Some('>') => {
                        depth -= 1;
                        self.pos += 2;
                        if depth == 0 {
                            break;
                        }
                        body.push_str("}>");
                        continue;
                    }
                    _ => {}
                },
            }
            body.push(ch);
            self.pos += 1;
        }

        let name = format!("{}__anon{}", self.script, self.out.hoisted.len() + 1);
        self.push_str(&format!("<function[{name}]>"));
        self.out.hoisted.push(HoistedScript {
            name,
            source: body,
            line: start_line,
        });
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
