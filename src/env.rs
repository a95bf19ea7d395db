//! Process configuration, read once from environment variables.
//!
//! - `MINIASM_TRACE`: `1` or `all` traces every machine event, `io` only console events.
//! - `MINIASM_MINIMAL`: `1` makes `--minimal` the default for `run`.

use std::cell::RefCell;

use crate::runtime::Event;

/// Which machine events `run` prints to stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceLevel {
    #[default]
    Off,
    /// Console input and output only
    Io,
    All,
}

impl TraceLevel {
    fn parse(value: &str) -> Option<TraceLevel> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "off" => Some(TraceLevel::Off),
            "io" => Some(TraceLevel::Io),
            "1" | "all" => Some(TraceLevel::All),
            _ => None,
        }
    }

    pub fn admits(self, event: &Event) -> bool {
        match self {
            TraceLevel::Off => false,
            TraceLevel::Io => matches!(event, Event::OutputChanged | Event::InputChanged),
            TraceLevel::All => true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Env {
    trace: TraceLevel,
    minimal: bool,
}

impl Env {
    /// Unrecognised values fall back to the default and are reported on stderr.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Env {
        let mut env = Env::default();
        if let Some(value) = lookup("MINIASM_TRACE") {
            match TraceLevel::parse(&value) {
                Some(level) => env.trace = level,
                None => eprintln!("ignoring MINIASM_TRACE={value:?}: expected 0, io or all"),
            }
        }
        env.minimal = lookup("MINIASM_MINIMAL").is_some_and(|v| v == "1");
        env
    }
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    set_env(Env::from_lookup(|name| std::env::var(name).ok()));
}

/// Trace level `run` uses when `--trace` is not given.
pub fn trace_level() -> TraceLevel {
    with_env(|env| env.trace)
}

pub fn is_minimal() -> bool {
    with_env(|env| env.minimal)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}
