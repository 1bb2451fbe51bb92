use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tagscript::cli::{self, CliArgs, ConfigFile};
use tagscript::config::{find_user_config, EngineConfig};
use tagscript::host::ConsoleHost;
use tagscript::script::engine::script_name;
use tagscript::script::Engine;

const USAGE: &str = "Usage: tagscript [-f[<file>]] [-c<cmd>] [-d<mode>] [-t<ms>] [-q] [<script>...]";

/// Read the rc file the command line selected.  `load` paths are resolved
/// against the file's directory.
fn load_config(args: &CliArgs) -> EngineConfig {
    let path = match &args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path.clone()),
        ConfigFile::Search => find_user_config(),
    };
    let Some(path) = path else {
        return EngineConfig::new();
    };

    match EngineConfig::load_file(&path) {
        Ok((mut config, errors)) => {
            for e in errors {
                eprintln!("tagscript: {}: {e}", path.display());
            }
            let dir = path.parent().unwrap_or(Path::new("."));
            config.scripts = config.scripts.iter().map(|p| dir.join(p)).collect();
            info!(path = %path.display(), "config loaded");
            config
        }
        Err(e) => {
            if matches!(args.config, ConfigFile::Explicit(_)) {
                eprintln!("tagscript: warning: {}: {e}", path.display());
            }
            EngineConfig::new()
        }
    }
}

/// Compile and register each file.  Returns the registered names, or exits
/// on the first failure.
fn load_scripts(engine: &mut Engine, paths: &[PathBuf]) -> Vec<String> {
    let mut names = Vec::new();
    for path in paths {
        let path = path.display().to_string();
        let source = match engine.env().host.read_script(&path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("tagscript: cannot read {path}: {e}");
                std::process::exit(1);
            }
        };
        let name = script_name(&path);
        if let Err(e) = engine.try_load_script(&name, &source) {
            eprintln!("tagscript: {e}");
            std::process::exit(1);
        }
        names.push(name);
    }
    names
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TAGSCRIPT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("tagscript: {e}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    let mut config = load_config(&args);
    if let Some(mode) = args.debug_mode() {
        config.debug = mode;
    }
    if let Some(ms) = args.tick_ms {
        config.tick = Duration::from_millis(ms);
    }
    let tick = config.tick;
    let preload = config.scripts.clone();

    let host = ConsoleHost::new(config.cvars.clone());
    let mut engine = Engine::with_config(Box::new(host), config);

    // rc `load` scripts are only registered; command-line scripts also run.
    load_scripts(&mut engine, &preload);
    let to_run = load_scripts(&mut engine, &args.scripts);

    for name in &to_run {
        if let Err(e) = engine.run(name) {
            eprintln!("tagscript: {e}");
        }
    }
    if let Some(cmd) = &args.command {
        if let Err(e) = engine.run_source("command", cmd) {
            eprintln!("tagscript: {e}");
            std::process::exit(1);
        }
    }

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut interval = tokio::time::interval(tick);
    let mut last = tokio::time::Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while !engine.is_idle() {
        tokio::select! {
            now = interval.tick() => {
                let delta = now.duration_since(last).as_secs_f64();
                last = now;
                engine.tick(delta);
            }
            _ = &mut ctrl_c => {
                debug!(active = engine.active_count(), "interrupted");
                engine.stop_all();
                // Let stopped queues run their completion.
                engine.tick(0.0);
                break;
            }
        }
    }
}
