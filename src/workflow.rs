//! GitHub Actions Runner Integration
//!
//! Everything the binaries read from or write to the runner goes through here:
//! an environment snapshot taken once at start-up, workflow commands on stdout
//! (`::add-mask::`, `::notice::`, `::group::`), and the tracing subscriber that
//! turns log events into `::error::`/`::warning::`/`::debug::` lines.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{info, warn, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::channel::{FileLineStore, LineStore, StateChannel};

/// Set to `true` by the runner for every step
pub const ACTIONS_VAR: &str = "GITHUB_ACTIONS";
/// Set to `1` when the workflow is re-run with debug logging
pub const RUNNER_DEBUG_VAR: &str = "RUNNER_DEBUG";

// ============================================================
// Environment Snapshot
// ============================================================

/// Immutable copy of the process environment
///
/// Empty values are treated as absent, matching how the runner passes unset
/// action inputs.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    /// Capture the current process environment (non-UTF-8 entries are skipped)
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Non-empty value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Non-empty variables starting with `prefix`, with the prefix stripped
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.vars.iter().filter_map(move |(k, v)| {
            let rest = k.strip_prefix(prefix)?;
            (!rest.is_empty() && !v.is_empty()).then_some((rest, v.as_str()))
        })
    }

    /// Whether this process runs as an Actions step
    pub fn is_actions(&self) -> bool {
        self.get(ACTIONS_VAR) == Some("true")
    }

    fn runner_debug(&self) -> bool {
        self.get(RUNNER_DEBUG_VAR) == Some("1")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ============================================================
// Console
// ============================================================

/// Destination for workflow commands and the standalone token print
pub trait Console: Send + Sync {
    fn write(&self, text: &str) -> io::Result<()>;
}

/// Process stdout, flushed after every write
pub struct Stdout;

impl Console for Stdout {
    fn write(&self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()
    }
}

/// In-memory console
#[derive(Default)]
pub struct BufferConsole {
    buf: Mutex<String>,
}

impl BufferConsole {
    pub fn contents(&self) -> String {
        self.buf.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl Console for BufferConsole {
    fn write(&self, text: &str) -> io::Result<()> {
        self.buf
            .lock()
            .map_err(|_| io::Error::other("console buffer poisoned"))?
            .push_str(text);
        Ok(())
    }
}

/// Escape workflow command data so it stays on one line
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Render `::command::value`
pub fn command(name: &str, value: &str) -> String {
    format!("::{}::{}", name, escape_data(value))
}

// ============================================================
// Runner
// ============================================================

/// The runner as seen by one invocation
pub struct Runner {
    env: Env,
    store: Arc<dyn LineStore>,
    console: Arc<dyn Console>,
}

impl Runner {
    pub fn new(env: Env, store: Arc<dyn LineStore>, console: Arc<dyn Console>) -> Self {
        Self {
            env,
            store,
            console,
        }
    }

    /// Real environment, real files, real stdout
    pub fn from_process() -> Self {
        Self::new(Env::from_process(), Arc::new(FileLineStore), Arc::new(Stdout))
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn is_actions(&self) -> bool {
        self.env.is_actions()
    }

    /// State and output files of the current step
    pub fn channel(&self) -> StateChannel<'_> {
        StateChannel::new(&self.env, self.store.as_ref())
    }

    /// Ask the runner to redact `value` from all later log output
    pub fn add_mask(&self, value: &str) -> io::Result<()> {
        self.issue("add-mask", value)
    }

    /// Annotate the run; outside of Actions this is an ordinary log line
    pub fn notice(&self, message: &str) -> io::Result<()> {
        if self.is_actions() {
            self.issue("notice", message)
        } else {
            info!("{}", message);
            Ok(())
        }
    }

    /// Fold the following log lines under `title` until the guard drops
    pub fn group(&self, title: &str) -> io::Result<Group<'_>> {
        if self.is_actions() {
            self.issue("group", title)?;
        }
        Ok(Group { runner: self })
    }

    /// Write `text` verbatim, without a trailing newline
    pub fn print(&self, text: &str) -> io::Result<()> {
        self.console.write(text)
    }

    fn issue(&self, name: &str, value: &str) -> io::Result<()> {
        self.console.write(&format!("{}\n", command(name, value)))
    }
}

/// Open `::group::` section, closed on drop
pub struct Group<'a> {
    runner: &'a Runner,
}

impl Drop for Group<'_> {
    fn drop(&mut self) {
        if self.runner.is_actions() {
            if let Err(e) = self.runner.console.write("::endgroup::\n") {
                warn!(error = %e, "Failed to close log group");
            }
        }
    }
}

// ============================================================
// Logging
// ============================================================

/// Renders events as workflow commands
///
/// ERROR, WARN and DEBUG/TRACE become `::error::`, `::warning::` and `::debug::`;
/// INFO is written as a plain line.
pub struct WorkflowCommandFormat;

impl<S, N> FormatEvent<S, N> for WorkflowCommandFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;

        let line = match *event.metadata().level() {
            Level::ERROR => command("error", &message),
            Level::WARN => command("warning", &message),
            Level::INFO => message,
            _ => command("debug", &message),
        };

        writeln!(writer, "{}", line)
    }
}

/// Install the global subscriber for this process
///
/// Under Actions events go to stdout as workflow commands; otherwise they go to
/// stderr so stdout carries nothing but the token.
pub fn init_logging(env: &Env) -> Result<()> {
    let default_level = if env.runner_debug() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if env.is_actions() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(io::stdout)
            .event_format(WorkflowCommandFormat)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to install workflow command logger")?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to install logger")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryLineStore;
    use tracing::{debug, error};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn runner(env: Env) -> (Runner, Arc<BufferConsole>) {
        let console = Arc::new(BufferConsole::default());
        let runner = Runner::new(env, Arc::new(MemoryLineStore::default()), console.clone());
        (runner, console)
    }

    #[test]
    fn test_env_treats_empty_as_absent() {
        let env: Env = [("INPUT_OWNER", ""), ("INPUT_APP_ID", "42")].into_iter().collect();

        assert_eq!(env.get("INPUT_OWNER"), None);
        assert_eq!(env.get("INPUT_APP_ID"), Some("42"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn test_env_with_prefix() {
        let env: Env = [
            ("INPUT_PERMISSION_CONTENTS", "write"),
            ("INPUT_PERMISSION_ISSUES", ""),
            ("INPUT_PERMISSION_", "read"),
            ("INPUT_OWNER", "octo"),
        ]
        .into_iter()
        .collect();

        let found: Vec<_> = env.with_prefix("INPUT_PERMISSION_").collect();
        assert_eq!(found, vec![("CONTENTS", "write")]);
    }

    #[test]
    fn test_is_actions() {
        let env: Env = [("GITHUB_ACTIONS", "true")].into_iter().collect();
        assert!(env.is_actions());

        let env: Env = [("GITHUB_ACTIONS", "false")].into_iter().collect();
        assert!(!env.is_actions());
        assert!(!Env::default().is_actions());
    }

    #[test]
    fn test_escape_data() {
        assert_eq!(escape_data("50% done\r\nnext"), "50%25 done%0D%0Anext");
        assert_eq!(command("warning", "a\nb"), "::warning::a%0Ab");
    }

    #[test]
    fn test_mask_and_group_under_actions() {
        let (runner, console) = runner([("GITHUB_ACTIONS", "true")].into_iter().collect());

        {
            let _group = runner.group("Request token").unwrap();
            runner.add_mask("ghs_secret").unwrap();
            runner.notice("done").unwrap();
        }

        assert_eq!(
            console.contents(),
            "::group::Request token\n::add-mask::ghs_secret\n::notice::done\n::endgroup::\n"
        );
    }

    #[test]
    fn test_standalone_has_no_commands() {
        let (runner, console) = runner(Env::default());

        {
            let _group = runner.group("Request token").unwrap();
            runner.notice("done").unwrap();
            runner.print("ghs_secret").unwrap();
        }

        assert_eq!(console.contents(), "ghs_secret");
    }

    #[test]
    fn test_workflow_command_format() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_writer(move || writer.clone())
            .event_format(WorkflowCommandFormat)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            error!("boom\nsecond line");
            warn!("careful");
            info!("plain");
            debug!("detail");
        });

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            output,
            "::error::boom%0Asecond line\n::warning::careful\nplain\n::debug::detail\n"
        );
    }

    #[test]
    fn test_buffer_console_poisoned() {
        let console = Arc::new(BufferConsole::default());
        let holder = console.clone();
        let _ = std::thread::spawn(move || {
            let _buf = holder.buf.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let err = console.write("::add-mask::x\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "console buffer poisoned");
    }
}
