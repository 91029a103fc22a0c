#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `cli` implements the command-line front-end of the `oc-sendfile` binary. It
//! serves one file over TCP: every client that connects receives the selected
//! byte range of the file, streamed by the [`sendfile`] engine, after which
//! the connection is closed.
//!
//! # Design
//!
//! The crate exposes [`run`] as the primary entry point. The function accepts
//! an iterator of arguments together with handles for standard output and
//! error, so tests can drive the whole front-end in process. A
//! [`clap`](https://docs.rs/clap/) command definition parses the switches;
//! `--help` and `--version` are rendered here rather than by clap so the text
//! stays stable. Serving is delegated to [`serve::serve`].
//!
//! # Errors
//!
//! Argument errors are reported with exit code `1`. Failures opening the file,
//! binding the listener or (with `--once`) completing the transfer are
//! reported with exit code `2`.
//!
//! # Examples
//!
//! ```
//! let mut stdout = Vec::new();
//! let mut stderr = Vec::new();
//! let exit_code = cli::run(["oc-sendfile", "--version"], &mut stdout, &mut stderr);
//!
//! assert_eq!(exit_code, 0);
//! assert!(String::from_utf8(stdout).unwrap().starts_with("oc-sendfile "));
//! assert!(stderr.is_empty());
//! ```

use std::ffi::OsString;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, Command, value_parser};
use tracing_subscriber::EnvFilter;

pub mod serve;

pub use serve::{ServeConfig, ServeError, ServeSummary};

/// Name used in usage text and diagnostics.
pub const PROGRAM_NAME: &str = "oc-sendfile";

/// Address served when `--listen` is not given.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Exit code for invalid command lines.
pub const EXIT_USAGE: i32 = 1;

/// Exit code for setup and I/O failures.
pub const EXIT_FAILURE: i32 = 2;

/// Maximum exit code representable by a Unix process.
const MAX_EXIT_CODE: i32 = u8::MAX as i32;

/// Deterministic help text describing the CLI surface.
const HELP_TEXT: &str = concat!(
    "Usage: oc-sendfile [OPTIONS] FILE\n",
    "\n",
    "Serve FILE over TCP. Every client that connects receives the selected\n",
    "byte range, streamed with zero-copy sendfile where the socket allows it.\n",
    "\n",
    "Options:\n",
    "      --listen ADDR        Address to listen on (default 127.0.0.1:8080).\n",
    "      --chunk-size BYTES   Maximum bytes per transfer syscall (default 1048576).\n",
    "      --timeout SECS       Time budget per connection (default unlimited).\n",
    "      --threads N          Worker threads; 0 runs on this thread (default 0).\n",
    "      --offset BYTES       First byte of FILE to send (default 0).\n",
    "      --length BYTES       Number of bytes to send (default to end of file).\n",
    "      --buffered           Use buffered read/write instead of sendfile.\n",
    "      --once               Serve a single client, then exit.\n",
    "  -v, --verbose            Increase log verbosity (repeatable).\n",
    "  -h, --help               Show this help message and exit.\n",
    "  -V, --version            Output version information and exit.\n",
);

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedArgs {
    show_help: bool,
    show_version: bool,
    verbosity: u8,
    listen: SocketAddr,
    chunk_size: u64,
    timeout: Option<u64>,
    threads: usize,
    offset: u64,
    length: Option<u64>,
    buffered: bool,
    once: bool,
    file: Option<PathBuf>,
}

/// Builds the `clap` command used for parsing.
fn clap_command() -> Command {
    Command::new(PROGRAM_NAME)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg_required_else_help(false)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .help("Show this help message and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .short('V')
                .help("Output version information and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Increase log verbosity.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Address to listen on.")
                .default_value(DEFAULT_LISTEN)
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .value_name("BYTES")
                .help("Maximum bytes per transfer syscall.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .help("Time budget per connection.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_name("N")
                .help("Worker threads; 0 runs on this thread.")
                .default_value("0")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("offset")
                .long("offset")
                .value_name("BYTES")
                .help("First byte of FILE to send.")
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("length")
                .long("length")
                .value_name("BYTES")
                .help("Number of bytes to send.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("buffered")
                .long("buffered")
                .help("Use buffered read/write instead of sendfile.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Serve a single client, then exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("File to serve.")
                .value_parser(value_parser!(PathBuf)),
        )
}

/// Parses command-line arguments into a [`ParsedArgs`] structure.
fn parse_args<I, S>(arguments: I) -> Result<ParsedArgs, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();

    if args.is_empty() {
        args.push(OsString::from(PROGRAM_NAME));
    }

    let mut matches = clap_command().try_get_matches_from(args)?;

    Ok(ParsedArgs {
        show_help: matches.get_flag("help"),
        show_version: matches.get_flag("version"),
        verbosity: matches.get_count("verbose"),
        listen: matches
            .remove_one::<SocketAddr>("listen")
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080))),
        chunk_size: matches
            .remove_one::<u64>("chunk-size")
            .unwrap_or(sendfile::DEFAULT_CHUNK_SIZE),
        timeout: matches.remove_one::<u64>("timeout"),
        threads: matches.remove_one::<usize>("threads").unwrap_or(0),
        offset: matches.remove_one::<u64>("offset").unwrap_or(0),
        length: matches.remove_one::<u64>("length"),
        buffered: matches.get_flag("buffered"),
        once: matches.get_flag("once"),
        file: matches.remove_one::<PathBuf>("file"),
    })
}

/// Renders the help text describing the supported options.
fn render_help() -> String {
    HELP_TEXT.to_string()
}

/// Renders the one-line version banner.
fn render_version() -> String {
    format!("{PROGRAM_NAME} {}\n", env!("CARGO_PKG_VERSION"))
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows the `-v` count.
/// Installing twice (as tests do) keeps the first subscriber.
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbosity >= 2)
        .try_init();
}

/// Runs the CLI using the provided argument iterator and output handles.
///
/// The function returns the process exit code that should be used by the
/// caller. It blocks until the server stops, which without `--once` only
/// happens on a setup failure.
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    match parse_args(arguments) {
        Ok(parsed) => execute(parsed, stdout, stderr),
        Err(error) => {
            let _ = write!(stderr, "{error}");
            let _ = writeln!(stderr, "Try '{PROGRAM_NAME} --help' for more information.");
            EXIT_USAGE
        }
    }
}

fn execute<Out, Err>(parsed: ParsedArgs, stdout: &mut Out, stderr: &mut Err) -> i32
where
    Out: Write,
    Err: Write,
{
    if parsed.show_help {
        return write_or_fail(stdout, stderr, &render_help());
    }
    if parsed.show_version {
        return write_or_fail(stdout, stderr, &render_version());
    }

    let Some(file) = parsed.file else {
        let _ = writeln!(stderr, "{PROGRAM_NAME}: missing FILE operand");
        let _ = writeln!(stderr, "Try '{PROGRAM_NAME} --help' for more information.");
        return EXIT_USAGE;
    };

    init_tracing(parsed.verbosity);

    let config = ServeConfig {
        listen: parsed.listen,
        file,
        offset: parsed.offset,
        length: parsed.length,
        chunk_size: parsed.chunk_size,
        timeout: parsed.timeout.map(Duration::from_secs),
        threads: parsed.threads,
        buffered: parsed.buffered,
        once: parsed.once,
    };

    match serve::serve(&config, stdout) {
        Ok(summary) => {
            tracing::info!(
                connections = summary.connections,
                bytes = summary.bytes,
                "server stopped"
            );
            0
        }
        Err(error) => {
            let _ = writeln!(stderr, "{PROGRAM_NAME}: {error}");
            EXIT_FAILURE
        }
    }
}

fn write_or_fail<Out: Write, Err: Write>(stdout: &mut Out, stderr: &mut Err, text: &str) -> i32 {
    match stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
        Ok(()) => 0,
        Err(error) => {
            let _ = writeln!(stderr, "{PROGRAM_NAME}: failed to write output: {error}");
            EXIT_FAILURE
        }
    }
}

/// Converts a numeric exit code into an [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, MAX_EXIT_CODE);
    std::process::ExitCode::from(clamped as u8)
}

#[cfg(test)]
mod tests;
