//! The boundary between the script engine and the application embedding it.
//!
//! The engine never prints or touches the filesystem directly; everything
//! goes through a [`ScriptHost`].  Two hosts ship with the crate:
//!
//! - [`BufferHost`] captures output lines in memory (tests, embedding).
//! - [`ConsoleHost`] writes to stdout/stderr (the `tagscript` binary).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::var::CVarStore;

// ── Verbosity ─────────────────────────────────────────────────────────────────

/// How much a queue reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugMode {
    None,
    #[default]
    Minimal,
    Full,
}

impl FromStr for DebugMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(DebugMode::None),
            "minimal" | "min" => Ok(DebugMode::Minimal),
            "full" | "on" => Ok(DebugMode::Full),
            other => Err(format!("unknown debug mode '{other}' (full, minimal or none)")),
        }
    }
}

impl fmt::Display for DebugMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DebugMode::None => "none",
            DebugMode::Minimal => "minimal",
            DebugMode::Full => "full",
        })
    }
}

/// Kind of a line sent to [`ScriptHost::output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Script output proper (`echo`); always shown.
    Plain,
    /// Execution trace; shown only at [`DebugMode::Full`].
    Info,
    /// Success reports; shown at `Full` and `Minimal`.
    Good,
    /// Failures; shown unless the mode is [`DebugMode::None`].
    Bad,
}

impl Severity {
    pub fn visible_at(self, mode: DebugMode) -> bool {
        match self {
            Severity::Plain => true,
            Severity::Info => mode == DebugMode::Full,
            Severity::Good => mode >= DebugMode::Minimal,
            Severity::Bad => mode > DebugMode::None,
        }
    }
}

// ── Host trait ────────────────────────────────────────────────────────────────

/// Callback used to read script files.  Receives the path, returns the text.
pub type FileLoader = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// Output sink and context provider for the engine.
pub trait ScriptHost {
    /// Receive a line of output.  Verbosity filtering has already happened.
    fn output(&mut self, severity: Severity, text: &str);

    /// Read a script file for `Engine::load_script_file`.
    fn read_script(&self, path: &str) -> Result<String, String>;

    /// Look up a host configuration variable.
    fn cvar(&self, name: &str) -> Option<String>;
}

fn read_relative(root: Option<&PathBuf>, path: &str) -> Result<String, String> {
    let full = match root {
        Some(root) => root.join(path),
        None => PathBuf::from(path),
    };
    std::fs::read_to_string(&full).map_err(|e| format!("{}: {e}", full.display()))
}

// ── BufferHost ────────────────────────────────────────────────────────────────

/// Captures every output line.  Script reads go through `file_loader` when
/// set, otherwise the filesystem (relative to `root`).
#[derive(Default)]
pub struct BufferHost {
    pub lines: Vec<(Severity, String)>,
    pub cvars: CVarStore,
    pub root: Option<PathBuf>,
    pub file_loader: Option<FileLoader>,
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cvars(cvars: CVarStore) -> Self {
        BufferHost {
            cvars,
            ..Self::default()
        }
    }

    /// Text of every [`Severity::Plain`] line, in order.
    pub fn plain(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == Severity::Plain)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Text of every line of the given severity.
    pub fn of(&self, severity: Severity) -> Vec<String> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl ScriptHost for BufferHost {
    fn output(&mut self, severity: Severity, text: &str) {
        self.lines.push((severity, text.to_owned()));
    }

    fn read_script(&self, path: &str) -> Result<String, String> {
        match &self.file_loader {
            Some(loader) => loader(path),
            None => read_relative(self.root.as_ref(), path),
        }
    }

    fn cvar(&self, name: &str) -> Option<String> {
        self.cvars.get(name).map(str::to_owned)
    }
}

/// A clonable handle onto a [`BufferHost`], so a test can keep reading the
/// output after handing the host to an engine.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<std::sync::Mutex<BufferHost>>);

impl SharedBuffer {
    pub fn new(host: BufferHost) -> Self {
        SharedBuffer(Arc::new(std::sync::Mutex::new(host)))
    }

    pub fn plain(&self) -> Vec<String> {
        self.0.lock().map(|h| h.plain()).unwrap_or_default()
    }

    pub fn of(&self, severity: Severity) -> Vec<String> {
        self.0.lock().map(|h| h.of(severity)).unwrap_or_default()
    }
}

impl ScriptHost for SharedBuffer {
    fn output(&mut self, severity: Severity, text: &str) {
        if let Ok(mut host) = self.0.lock() {
            host.output(severity, text);
        }
    }

    fn read_script(&self, path: &str) -> Result<String, String> {
        self.0
            .lock()
            .map_err(|_| "host lock poisoned".to_owned())?
            .read_script(path)
    }

    fn cvar(&self, name: &str) -> Option<String> {
        self.0.lock().ok()?.cvar(name)
    }
}

// ── ConsoleHost ───────────────────────────────────────────────────────────────

/// Writes plain output to stdout and diagnostics to stderr.
pub struct ConsoleHost {
    pub cvars: CVarStore,
    pub root: Option<PathBuf>,
}

impl ConsoleHost {
    pub fn new(cvars: CVarStore) -> Self {
        ConsoleHost { cvars, root: None }
    }
}

impl ScriptHost for ConsoleHost {
    fn output(&mut self, severity: Severity, text: &str) {
        match severity {
            Severity::Plain => println!("{text}"),
            Severity::Info => eprintln!("+ {text}"),
            Severity::Good => eprintln!("% {text}"),
            Severity::Bad => eprintln!("! {text}"),
        }
    }

    fn read_script(&self, path: &str) -> Result<String, String> {
        read_relative(self.root.as_ref(), path)
    }

    fn cvar(&self, name: &str) -> Option<String> {
        self.cvars.get(name).map(str::to_owned)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
