//! Block assembler: statements → one flat array of command entries.
//!
//! ```text
//! if <x> {          [0] if          block = 1..=2
//!     echo a        [1] echo
//!     echo b        [2] echo
//! }                 [3] }           owner = 0   (block closer)
//! echo c            [4] echo
//! ```
//!
//! Nested blocks are inlined as contiguous index ranges.  Every owned block
//! is followed by a synthetic closer entry that calls back into its owner
//! (`Command::on_block_end`) when reached.

use std::collections::BTreeMap;

use crate::error::ScriptError;
use crate::host::DebugMode;
use crate::script::args::{self, Argument};
use crate::script::command::CommandRegistry;
use crate::script::lexer::Statement;

/// Name given to synthetic block-closer entries.
pub const BLOCK_END: &str = "}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandPrefix {
    #[default]
    None,
    /// `@cmd`: silence this entry's reports.
    Quiet,
    /// `&cmd`: wait for the command's completion.
    Wait,
}

/// Inclusive index range of a nested block.  An empty block has
/// `end + 1 == start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    pub end: usize,
}

impl BlockRange {
    pub fn is_empty(&self) -> bool {
        self.end + 1 == self.start
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.end
    }

    /// Index of the block-closer entry that follows the range.
    pub fn closer(&self) -> usize {
        self.end + 1
    }
}

/// One parsed command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    pub name: String,
    pub prefix: CommandPrefix,
    pub arguments: Vec<Argument>,
    pub named: BTreeMap<String, Argument>,
    pub line: usize,
    /// Per-entry verbosity override (`@` forces [`DebugMode::None`]).
    pub debug: Option<DebugMode>,
    pub block: Option<BlockRange>,
    /// For block closers: index of the entry owning the block.
    pub owner: Option<usize>,
    pub index: usize,
    /// Statement text the entry was built from.
    pub source: String,
}

impl CommandEntry {
    /// Build an entry directly (synthetic entries, tests).
    pub fn new(name: &str, arguments: Vec<Argument>, line: usize) -> Self {
        CommandEntry {
            name: name.to_lowercase(),
            prefix: CommandPrefix::None,
            arguments,
            named: BTreeMap::new(),
            line,
            debug: None,
            block: None,
            owner: None,
            index: 0,
            source: name.to_owned(),
        }
    }

    fn closer(owner: usize, line: usize, index: usize) -> Self {
        CommandEntry {
            owner: Some(owner),
            index,
            source: BLOCK_END.to_owned(),
            ..CommandEntry::new(BLOCK_END, Vec::new(), line)
        }
    }

    pub fn is_closer(&self) -> bool {
        self.owner.is_some()
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

struct Token {
    text: String,
    quoted: bool,
}

/// Split a statement on whitespace outside quotes and tag regions.  Quote
/// characters are removed; tag regions are kept intact.
fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    let mut quote: Option<char> = None;
    let mut tag_depth = 0usize;

    for (i, &ch) in chars.iter().enumerate() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }
        if tag_depth > 0 {
            current.push(ch);
            if ch == '<' && args::opens_tag(chars.get(i + 1).copied()) {
                tag_depth += 1;
            } else if ch == '>' {
                tag_depth -= 1;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                quoted = true;
                started = true;
            }
            c if c.is_whitespace() => {
                if started {
                    tokens.push(Token {
                        text: std::mem::take(&mut current),
                        quoted,
                    });
                    quoted = false;
                    started = false;
                }
            }
            '<' if args::opens_tag(chars.get(i + 1).copied()) => {
                tag_depth = 1;
                current.push(ch);
                started = true;
            }
            _ => {
                current.push(ch);
                started = true;
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".into());
    }
    if tag_depth > 0 {
        return Err(format!("unclosed tag in '{text}'"));
    }
    if started {
        tokens.push(Token {
            text: current,
            quoted,
        });
    }
    Ok(tokens)
}

/// Turn one statement into an entry (block fields unset).
pub fn parse_entry(script: &str, statement: &Statement, index: usize) -> Result<CommandEntry, ScriptError> {
    let line = statement.line;
    let syntax = |msg: String| ScriptError::syntax(script, line, msg);

    let mut tokens = tokenize(&statement.text).map_err(syntax)?.into_iter();
    let Some(first) = tokens.next() else {
        return Err(syntax("empty statement".into()));
    };

    let (prefix, name) = match first.text.chars().next() {
        Some('@') => (CommandPrefix::Quiet, &first.text[1..]),
        Some('&') => (CommandPrefix::Wait, &first.text[1..]),
        _ => (CommandPrefix::None, first.text.as_str()),
    };
    if name.is_empty() {
        return Err(syntax("missing command name".into()));
    }

    let mut entry = CommandEntry {
        prefix,
        line,
        index,
        debug: (prefix == CommandPrefix::Quiet).then_some(DebugMode::None),
        source: statement.text.clone(),
        ..CommandEntry::new(name, Vec::new(), line)
    };

    for token in tokens {
        if !token.quoted && token.text.len() > 2 && token.text.starts_with("--") {
            let body = &token.text[2..];
            let (key, value) = match body.split_once('=') {
                Some((k, v)) => (k, args::parse_argument(v).map_err(syntax)?),
                None => (body, Argument::literal("true")),
            };
            entry.named.insert(key.to_lowercase(), value);
            continue;
        }
        let mut arg = args::parse_argument(&token.text).map_err(syntax)?;
        arg.quoted = token.quoted;
        entry.arguments.push(arg);
    }
    Ok(entry)
}

// ── Assembly ──────────────────────────────────────────────────────────────────

/// Assemble lexed statements into the flat entry array.
pub fn assemble(script: &str, statements: &[Statement]) -> Result<Vec<CommandEntry>, ScriptError> {
    let mut out = Vec::new();
    assemble_into(script, statements, &mut out)?;
    Ok(out)
}

fn assemble_into(
    script: &str,
    statements: &[Statement],
    out: &mut Vec<CommandEntry>,
) -> Result<(), ScriptError> {
    let mut depth = 0usize;
    let mut child_start = 0usize;
    let mut open_line = 0usize;
    // Last entry emitted at this level, eligible to own a following block.
    let mut last: Option<usize> = None;

    for (i, statement) in statements.iter().enumerate() {
        if statement.is_open_brace() {
            if depth == 0 {
                child_start = i + 1;
                open_line = statement.line;
            }
            depth += 1;
            continue;
        }
        if statement.is_close_brace() {
            if depth == 0 {
                return Err(ScriptError::syntax(script, statement.line, "unexpected '}'"));
            }
            depth -= 1;
            if depth > 0 {
                continue;
            }
            let children = &statements[child_start..i];
            match last {
                Some(owner) => {
                    if out[owner].block.is_some() {
                        return Err(ScriptError::syntax(
                            script,
                            open_line,
                            format!("'{}' already has a block", out[owner].name),
                        ));
                    }
                    let start = out.len();
                    assemble_into(script, children, out)?;
                    out[owner].block = Some(BlockRange {
                        start,
                        end: out.len() - 1,
                    });
                    let index = out.len();
                    out.push(CommandEntry::closer(owner, statement.line, index));
                }
                None => {
                    assemble_into(script, children, out)?;
                }
            }
            continue;
        }
        if depth > 0 {
            continue;
        }
        let index = out.len();
        out.push(parse_entry(script, statement, index)?);
        last = Some(index);
    }

    if depth > 0 {
        return Err(ScriptError::syntax(script, open_line, "missing '}'"));
    }
    Ok(())
}

/// Post-parse validation of every entry by its command.
pub fn validate(script: &str, entries: &[CommandEntry], commands: &CommandRegistry) -> Result<(), ScriptError> {
    for entry in entries.iter().filter(|e| !e.is_closer()) {
        let command = commands
            .get(&entry.name)
            .ok_or_else(|| ScriptError::command(script, entry.line, &entry.name, "unknown command"))?;
        command
            .validate(entry)
            .map_err(|msg| ScriptError::command(script, entry.line, &entry.name, msg))?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
