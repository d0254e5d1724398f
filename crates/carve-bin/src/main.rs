//! carve entrypoint.
//!
//! Wires the front end (tokenizer + builder) to the engine and maps the run
//! report onto exit codes:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | at least one clause committed |
//! | 1 | no clause committed (search / resolve / `fail` failures) |
//! | 2 | usage or program parse error |
//! | 3 | I/O error |
//! | 4 | resource exhaustion |
//! | 5 | pattern compile error |

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use core_engine::{Engine, ErrorKind};
use core_parse::ParseError;
use core_source::Source;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_NO_CLAUSE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_IO: u8 = 3;
const EXIT_RESOURCE: u8 = 4;
const EXIT_REGEX: u8 = 5;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "carve",
    version,
    about = "Byte-oriented text extraction driven by a tiny clause program",
    after_help = "Operations: take, skip, find, findr, take to, take until, take untilr,\n\
                  label, goto, viewset, viewclear, print, fail; clauses join with\n\
                  THEN / AND / OR. Example:\n\
                  \n    carve -i app.log find \"ERROR\" take to line-end\n"
)]
struct Args {
    /// Input path; `-` spools stdin to a temporary file.
    #[arg(short = 'i', long = "input", default_value = "-")]
    input: PathBuf,
    /// Output path (defaults to stdout).
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// Whole program as one string instead of trailing operands.
    #[arg(long = "program", conflicts_with = "ops")]
    program: Option<String>,
    /// Append tracing output to this file (RUST_LOG controls verbosity).
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
    /// Program operations, one token per operand.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    ops: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match configure_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("carve: {e:#}");
            return ExitCode::from(EXIT_IO);
        }
    };
    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("carve: {e:#}");
            ExitCode::from(exit_for_anyhow(&e))
        }
    }
}

/// Stderr subscriber by default; `--log-file` swaps in a non-blocking file
/// appender whose guard must outlive the run.
fn configure_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env();
    match &args.log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn run(args: &Args) -> Result<u8> {
    let tokens = match &args.program {
        Some(text) => match core_parse::split_program(text) {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("carve: {e}");
                return Ok(EXIT_USAGE);
            }
        },
        None => args.ops.clone(),
    };
    if tokens.is_empty() {
        eprintln!("carve: no program given (see --help)");
        return Ok(EXIT_USAGE);
    }
    let prog = match core_parse::build_program(&tokens) {
        Ok(prog) => prog,
        Err(e) => {
            eprintln!("carve: {e}");
            return Ok(match e {
                ParseError::Regex(_) => EXIT_REGEX,
                ParseError::Grammar(_) | ParseError::LabelFmt(_) => EXIT_USAGE,
            });
        }
    };
    info!(
        clauses = prog.clauses.len(),
        labels = prog.label_names.len(),
        input = %args.input.display(),
        "program built"
    );

    let mut src = if args.input.as_os_str() == "-" {
        Source::from_stdin().context("spooling stdin")?
    } else {
        Source::open(&args.input)
            .with_context(|| format!("opening {}", args.input.display()))?
    };

    let stdout = io::stdout();
    let mut out: BufWriter<Box<dyn Write>> = match &args.output {
        Some(path) => BufWriter::new(Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => BufWriter::new(Box::new(stdout.lock())),
    };
    let mut err_sink = io::stderr();

    let mut engine = Engine::new(&prog);
    let report = engine
        .run(&prog, &mut src, &mut out, &mut err_sink)
        .context("run aborted")?;
    out.flush().context("flushing output")?;

    info!(
        clauses_ok = report.clauses_ok,
        first_fail = ?report.first_fail,
        "run finished"
    );
    Ok(if report.success() {
        EXIT_OK
    } else {
        match report.first_fail {
            Some((_, ErrorKind::Oom | ErrorKind::Capacity)) => EXIT_RESOURCE,
            Some((_, ErrorKind::Io)) => EXIT_IO,
            _ => EXIT_NO_CLAUSE,
        }
    })
}

fn exit_for_anyhow(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<core_engine::EngineError>() {
        Some(err) => match err.kind() {
            ErrorKind::Oom | ErrorKind::Capacity => EXIT_RESOURCE,
            _ => EXIT_IO,
        },
        None => EXIT_IO,
    }
}
