/// End-to-end scenarios through the public engine API.
///
/// Each test compiles a small script, drives the scheduler by hand and checks
/// what reached the host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tagscript::config::EngineConfig;
use tagscript::error::{EngineError, ScriptError};
use tagscript::host::{BufferHost, DebugMode, Severity, SharedBuffer};
use tagscript::script::{Engine, QueueState, Runnable, TagValue};
use tagscript::var::{CVarFlags, CVarStore};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn engine() -> (Engine, SharedBuffer) {
    let out = SharedBuffer::default();
    (Engine::new(Box::new(out.clone())), out)
}

fn run(src: &str) -> Vec<String> {
    let (mut engine, out) = engine();
    engine.run_source("scenario", src).unwrap();
    while !engine.is_idle() {
        engine.tick(0.25);
    }
    out.plain()
}

// ── Scheduling ────────────────────────────────────────────────────────────────

#[test]
fn wait_spans_ticks_and_completes_once() {
    let (mut engine, out) = engine();
    let routine = engine.compile("greet", "echo \"hi\"; wait 1; echo \"bye\";").unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&completions);
    let mut queue = engine.env_mut().new_queue(Runnable::new(routine));
    queue.on_complete(Box::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    queue.execute(engine.env_mut());
    assert_eq!(out.plain(), vec!["hi"]);
    assert_eq!(queue.state(), QueueState::Waiting);

    queue.tick(engine.env_mut(), 0.4);
    queue.tick(engine.env_mut(), 0.4);
    assert_eq!(out.plain(), vec!["hi"]);

    queue.tick(engine.env_mut(), 0.4);
    assert_eq!(out.plain(), vec!["hi", "bye"]);
    assert!(queue.is_finished());

    queue.tick(engine.env_mut(), 1.0);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn queue_without_waits_finishes_in_execute() {
    let (mut engine, out) = engine();
    engine.run_source("three", "echo a; echo b; echo c").unwrap();
    assert!(engine.is_idle());
    assert_eq!(out.plain(), vec!["a", "b", "c"]);
}

#[test]
fn queues_tick_side_by_side() {
    let (mut engine, out) = engine();
    engine.run_source("one", "echo 1a; wait; echo 1b").unwrap();
    engine.run_source("two", "echo 2a; wait; echo 2b").unwrap();
    assert_eq!(engine.active_count(), 2);
    engine.tick(0.0);
    assert_eq!(out.plain(), vec!["1a", "2a", "1b", "2b"]);
    assert!(engine.is_idle());
}

#[test]
fn stopped_queue_skips_the_rest() {
    let (mut engine, out) = engine();
    let id = engine.run_source("long", "echo start; wait 5; echo never").unwrap();
    assert!(engine.stop(id));
    engine.tick(10.0);
    assert!(engine.is_idle());
    assert_eq!(out.plain(), vec!["start"]);
}

// ── Compile failures ──────────────────────────────────────────────────────────

#[test]
fn if_without_condition_fails_compile() {
    let (mut engine, _) = engine();
    let err = engine.compile("bad", "if { echo \"x\" }").unwrap_err();
    match &err {
        ScriptError::Command { line, command, message, .. } => {
            assert_eq!(*line, 1);
            assert_eq!(command, "if");
            assert!(message.contains("at least 1 argument"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.script("bad").is_none());
}

#[test]
fn unresolved_segment_names_its_position() {
    let (mut engine, _) = engine();
    let err = engine.compile("bad", "echo ok\necho <text[a].nonsense>").unwrap_err();
    match err {
        ScriptError::Tag { line, segment, key, .. } => {
            assert_eq!(line, 2);
            assert_eq!(segment, 1);
            assert_eq!(key, "nonsense");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn dynamic_value_needs_a_known_handler() {
    let (mut engine, _) = engine();
    let err = engine
        .compile("bad", "var d as dynamic = <text[a]>\necho <d.no_such_key_anywhere>")
        .unwrap_err();
    match err {
        ScriptError::Tag { line, segment, key, .. } => {
            assert_eq!(line, 2);
            assert_eq!(segment, 1);
            assert_eq!(key, "no_such_key_anywhere");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine
        .compile("good", "var d as dynamic = <text[a]>\necho <d.length>")
        .is_ok());
}

#[test]
fn load_script_substitutes_error_routine() {
    let (mut engine, out) = engine();
    engine.load_script("broken", "echo \"unterminated");
    assert_eq!(out.of(Severity::Bad).len(), 1);
    engine.run("broken").unwrap();
    assert_eq!(out.of(Severity::Bad).len(), 2);
    assert!(out.plain().is_empty());
}

// ── Language ──────────────────────────────────────────────────────────────────

#[test]
fn tags_chain_through_types() {
    assert_eq!(
        run("var name = \"World\"; echo Hello, <name.to_upper>!"),
        vec!["Hello, WORLD!"]
    );
    assert_eq!(run("echo <list[a|b|c].reversed.join[-]>"), vec!["c-b-a"]);
    assert_eq!(run("echo <map[x:1|y:2].y>"), vec!["2"]);
}

#[test]
fn fallback_covers_null_and_failure() {
    assert_eq!(run("echo <null||nothing>"), vec!["nothing"]);
    assert_eq!(run("echo <integer[1].divide[0]||undefined>"), vec!["undefined"]);
}

#[test]
fn oversized_repeat_falls_back_and_script_continues() {
    assert_eq!(
        run("echo <text[xy].repeat[9223372036854775807]||big>; echo after"),
        vec!["big", "after"]
    );
    assert_eq!(run("echo <text[ab].repeat[2]>"), vec!["abab"]);
}

#[test]
fn get_outside_bounds_is_null() {
    assert_eq!(run("echo <text[abc].get[0]||none>"), vec!["none"]);
    assert_eq!(run("echo <text[abc].get[3]>"), vec!["c"]);
    assert_eq!(run("echo <text[abc].get[4]||none>"), vec!["none"]);
    assert_eq!(run("echo <list[a|b].get[0]||none>"), vec!["none"]);
    assert_eq!(run("echo <list[a|b].get[2]>"), vec!["b"]);
    assert_eq!(run("echo <list[a|b].get[3]||none>"), vec!["none"]);
}

#[test]
fn integer_overflow_reaches_fallback() {
    assert_eq!(
        run("echo <integer[9223372036854775807].add[1]||overflow>; echo after"),
        vec!["overflow", "after"]
    );
    assert_eq!(
        run("echo <integer[-9223372036854775808].multiply[-1]||overflow>"),
        vec!["overflow"]
    );
}

#[test]
fn non_finite_text_is_not_a_number() {
    let (mut engine, _) = engine();
    assert!(matches!(
        engine.compile("bad", "echo <number[nan]>"),
        Err(ScriptError::Tag { .. })
    ));
    assert_eq!(run("echo <text[inf].as_number||bad>"), vec!["bad"]);
    assert_eq!(run("var x = nan; echo <x.as[number]||bad>"), vec!["bad"]);
    assert_eq!(run("echo <number[2.5]>"), vec!["2.5"]);
}

#[test]
fn control_flow_mix() {
    let src = "
        var total = 0
        foreach <list[1|2|3|4]> as n {
            if <n.as[integer].modulo[2]> == 0 {
                var total = <total.add[<n>]>
            }
        }
        repeat 2 {
            echo tick
            wait 0.5
        }
        echo <total>
    ";
    assert_eq!(run(src), vec!["tick", "tick", "6"]);
}

#[test]
fn anonymous_script_runs_as_function() {
    let (mut engine, out) = engine();
    engine
        .run_source("outer", "var x = <{ determine 5 }>; echo <x>")
        .unwrap();
    assert_eq!(out.plain(), vec!["5"]);
    assert!(engine.script("outer__anon1").is_some());
}

#[test]
fn waited_run_releases_parent() {
    let (mut engine, out) = engine();
    engine.try_load_script("slow", "wait 1; echo slow done").unwrap();
    engine.run_source("main", "&run slow; echo main done").unwrap();
    for _ in 0..4 {
        engine.tick(0.5);
    }
    assert_eq!(out.plain(), vec!["slow done", "main done"]);
    assert!(engine.is_idle());
}

#[test]
fn call_returns_determinations() {
    let (mut engine, _) = engine();
    engine
        .try_load_script("pair", "determine <integer[1]>; determine <integer[2]>")
        .unwrap();
    assert_eq!(
        engine.call("pair").unwrap(),
        vec![TagValue::Integer(1), TagValue::Integer(2)]
    );
    assert!(matches!(engine.call("absent"), Err(EngineError::UnknownScript(_))));
}

// ── Host and configuration ────────────────────────────────────────────────────

#[test]
fn cvars_reach_scripts() {
    let mut cvars = CVarStore::new();
    cvars.define("greeting", "hello", CVarFlags::READ_ONLY);
    let out = SharedBuffer::new(BufferHost::with_cvars(cvars));
    let mut engine = Engine::new(Box::new(out.clone()));
    engine
        .run_source("c", "echo <cvar[greeting]>; echo <cvar[missing]||unset>")
        .unwrap();
    assert_eq!(out.plain(), vec!["hello", "unset"]);
}

#[test]
fn config_debug_mode_applies_to_new_queues() {
    let (config, errors) = EngineConfig::load_str("debug none\ndepth 4");
    assert!(errors.is_empty());
    assert_eq!(config.debug, DebugMode::None);

    let out = SharedBuffer::default();
    let mut engine = Engine::with_config(Box::new(out.clone()), config);
    engine.run_source("q", "error hidden; echo never").unwrap();
    assert!(out.of(Severity::Bad).is_empty());
    assert!(out.plain().is_empty());
}

// ── Events ────────────────────────────────────────────────────────────────────

#[test]
fn event_handlers_see_parameters() {
    let (mut engine, out) = engine();
    engine
        .register_event("player_joins", &[("player", "text"), ("level", "integer")])
        .unwrap();
    engine
        .add_event_handler("player_joins", "welcome", "echo Welcome <player>!")
        .unwrap();
    engine
        .add_event_handler("player_joins", "grant", "determine <level.add[1]>")
        .unwrap();

    let determined = engine
        .fire_event("player_joins", vec![TagValue::text("ann"), TagValue::text("4")])
        .unwrap();
    assert_eq!(out.plain(), vec!["Welcome ann!"]);
    assert_eq!(determined, vec![TagValue::Integer(5)]);
}
