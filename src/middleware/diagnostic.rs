//! Stack capture for recovered panics.
//!
//! By the time `catch_unwind` hands back a panic payload the stack has already
//! unwound, so the trace has to be taken inside the panic hook. keel installs
//! one process-wide hook (the first time a [`Recovery`](super::Recovery) is
//! built) which:
//!
//! - on threads currently polling inside a recovery scope, captures the trace
//!   and the panic location into a thread-local slot and prints nothing, the
//!   recovery callback is the reporting path;
//! - everywhere else, defers to whatever hook was installed before it.
//!
//! The recovery layer takes the slot right after it catches the unwind, on
//! the same thread and within the same poll.
//!
//! Panics a handler catches with its own `catch_unwind` while inside a scope
//! are captured too, and so are not printed by the previous hook. Their
//! capture is discarded the next time the thread enters an outermost scope.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::Once;

/// One stack frame of a [`DiagnosticTrace`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticFrame {
    /// Source file, empty when the frame has no debug info.
    pub file: String,
    /// Line in `file`, 0 when unknown.
    pub line: u32,
    /// Demangled function path, `<unknown>` when unresolved.
    pub function: String,
}

/// Stack of a recovered panic, innermost (panicking) frame first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticTrace {
    frames: Vec<DiagnosticFrame>,
}

impl DiagnosticTrace {
    pub fn frames(&self) -> &[DiagnosticFrame] { &self.frames }
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }
    pub fn len(&self) -> usize { self.frames.len() }

    /// Parses the rendering of a [`Backtrace`] and drops the leading frames
    /// that belong to the panic runtime and to this module.
    pub(crate) fn from_backtrace(rendered: &str) -> Self {
        let mut frames = parse(rendered);
        let machinery = frames.iter().take_while(|f| is_machinery(&f.function)).count();
        frames.drain(..machinery);
        Self { frames }
    }
}

/// One `file:line function()` line per frame.
impl fmt::Display for DiagnosticTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "{}:{} {}()", frame.file, frame.line, frame.function)?;
        }
        Ok(())
    }
}

/// Everything the hook recorded about one panic.
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub(crate) trace: DiagnosticTrace,
    pub(crate) location: Option<String>,
}

// ── Hook and per-thread state ─────────────────────────────────────────────────

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static SLOT: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

pub(crate) fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !in_scope() {
                return previous(info);
            }
            let captured = capture(info);
            let _ = SLOT.try_with(|slot| slot.replace(Some(captured)));
        }));
    });
}

fn in_scope() -> bool {
    DEPTH.try_with(Cell::get).unwrap_or(0) > 0
}

fn capture(info: &PanicHookInfo<'_>) -> Captured {
    let backtrace = Backtrace::force_capture();
    Captured {
        trace: DiagnosticTrace::from_backtrace(&backtrace.to_string()),
        location: info.location().map(ToString::to_string),
    }
}

/// Marks the current thread as polling inside a recovery layer until dropped.
pub(crate) struct Scope(());

impl Scope {
    pub(crate) fn enter() -> Self {
        let depth = DEPTH.with(|d| d.replace(d.get() + 1));
        if depth == 0 {
            // Drop anything left by a panic the handler caught itself.
            SLOT.with(|slot| slot.take());
        }
        Scope(())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Takes what the hook recorded for the panic just caught on this thread.
/// Empty if the hook was replaced after keel installed it.
pub(crate) fn take() -> Captured {
    SLOT.with(|slot| slot.take()).unwrap_or_default()
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Frame name prefixes that sit between the panicking function and the hook.
const MACHINERY: &[&str] = &[
    "std::backtrace::",
    "std::backtrace_rs::",
    "std::panicking::",
    "std::panic::",
    "std::rt::begin_panic",
    "std::sys::backtrace::",
    "std::sys_common::backtrace::",
    "core::panicking::",
    "core::panic::",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "<alloc::boxed::Box<",
    concat!(module_path!(), "::"),
];

fn is_machinery(function: &str) -> bool {
    MACHINERY.iter().any(|prefix| function.starts_with(prefix))
}

/// Reads the std rendering:
///
/// ```text
///    4: app::handlers::die
///              at ./src/handlers.rs:12:5
/// ```
fn parse(rendered: &str) -> Vec<DiagnosticFrame> {
    let mut frames: Vec<DiagnosticFrame> = Vec::new();
    for line in rendered.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                (frame.file, frame.line) = split_location(location);
            }
            continue;
        }
        let Some((index, function)) = line.split_once(": ") else { continue };
        if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
            frames.push(DiagnosticFrame {
                function: function.trim().to_owned(),
                ..DiagnosticFrame::default()
            });
        }
    }
    frames
}

/// `file:line:column` or `file:line` → `(file, line)`.
fn split_location(location: &str) -> (String, u32) {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next().unwrap_or_default();
    let middle = parts.next();
    let rest = parts.next();
    match (middle.and_then(|m| m.parse::<u32>().ok()), last.parse::<u32>()) {
        (Some(line), Ok(_column)) => (rest.unwrap_or_default().to_owned(), line),
        (_, Ok(line)) => {
            let file = location.rsplit_once(':').map_or(location, |(file, _)| file);
            (file.to_owned(), line)
        }
        _ => (location.to_owned(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "\
   0: keel::middleware::diagnostic::capture
             at ./src/middleware/diagnostic.rs:101:21
   1: <alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call
             at /rustc/abc/library/alloc/src/boxed.rs:1985:9
   2: std::panicking::rust_panic_with_hook
             at /rustc/abc/library/std/src/panicking.rs:841:13
   3: core::panicking::panic_fmt
             at /rustc/abc/library/core/src/panicking.rs:75:14
   4: app::handlers::die
             at ./src/handlers.rs:12:5
   5: app::handlers::serve::{{closure}}
             at ./src/handlers.rs:20:9
   6: std::panicking::try
             at /rustc/abc/library/std/src/panicking.rs:552:19
   7: <unknown>
";

    #[test]
    fn panics_caught_inside_a_scope_do_not_leak_into_the_next() {
        install_hook();
        {
            let _scope = Scope::enter();
            let caught = panic::catch_unwind(|| -> u8 { panic!("handled by the handler") });
            assert!(caught.is_err());
        }
        assert!(SLOT.with(|slot| slot.borrow().is_some()));

        let _scope = Scope::enter();
        let captured = take();
        assert!(captured.trace.is_empty());
        assert_eq!(captured.location, None);
    }

    #[test]
    fn trace_starts_at_the_panicking_function() {
        let trace = DiagnosticTrace::from_backtrace(RENDERED);
        let first = &trace.frames()[0];
        assert_eq!(first.function, "app::handlers::die");
        assert_eq!(first.file, "./src/handlers.rs");
        assert_eq!(first.line, 12);
    }

    #[test]
    fn only_leading_machinery_is_dropped() {
        let trace = DiagnosticTrace::from_backtrace(RENDERED);
        let names: Vec<_> = trace.frames().iter().map(|f| f.function.as_str()).collect();
        assert_eq!(
            names,
            ["app::handlers::die", "app::handlers::serve::{{closure}}", "std::panicking::try", "<unknown>"]
        );
    }

    #[test]
    fn frames_without_location_keep_defaults() {
        let trace = DiagnosticTrace::from_backtrace(RENDERED);
        let last = trace.frames().last().unwrap();
        assert_eq!(last.file, "");
        assert_eq!(last.line, 0);
    }

    #[test]
    fn split_location_handles_missing_column_and_drive_letters() {
        assert_eq!(split_location("src/a.rs:7"), ("src/a.rs".to_owned(), 7));
        assert_eq!(split_location(r"C:\src\a.rs:7:3"), (r"C:\src\a.rs".to_owned(), 7));
        assert_eq!(split_location("weird"), ("weird".to_owned(), 0));
    }

    #[test]
    fn display_renders_one_line_per_frame() {
        let trace = DiagnosticTrace::from_backtrace(RENDERED);
        let rendered = trace.to_string();
        assert!(rendered.starts_with("./src/handlers.rs:12 app::handlers::die()\n"));
        assert_eq!(rendered.lines().count(), trace.len());
    }

    #[test]
    fn hook_outside_scope_leaves_slot_empty() {
        install_hook();
        let _ = panic::catch_unwind(|| -> u8 { panic!("not ours") });
        assert!(take().trace.is_empty());
    }
}
