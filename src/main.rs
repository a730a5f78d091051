//! zapdir - Multithreaded recursive folder deleter
//!
//! Entry point for the CLI application.

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use zapdir::config::{vet_path, CliArgs, EraseConfig};
use zapdir::error::{ConfigError, MachineError, OpError};
use zapdir::machine::{self, TickInfo};
use zapdir::progress::{self, ProgressReporter, Status};
use zapdir::tree::Folder;

// Exit codes; errors raise the code by one per decade of error count.
const RC_OK: u8 = 0;
const RC_CANCELLED: u8 = 1;
const RC_UNLIKELY: u8 = 4;
const RC_OK_WITH_ERRORS: u8 = 10;

const RC_INVALID_ARG: u8 = 51;
const RC_NOT_CONFIRMED: u8 = 52;

const RC_PATH_NOT_FOUND: u8 = 60;
const RC_PATH_IS_FILE: u8 = 61;
const RC_PATH_IS_ROOT: u8 = 62;
const RC_PATH_RESTRICTED: u8 = 63;
const RC_PATH_CANT_CHECK: u8 = 65;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(RC_UNLIKELY)
        }
    }
}

/// CLI-side run state, fed by the machine's tick callback
struct Context {
    status: Status,
    scanner_err: Vec<OpError>,
    deleter_err: Vec<OpError>,
    cancel: Arc<AtomicBool>,
    reporter: Option<ProgressReporter>,
}

impl Context {
    fn on_tick(&mut self, info: &TickInfo<'_>) -> bool {
        self.status.folders_found = info.folders_found;
        self.status.folders_deleted = info.folders_deleted;
        self.status.files_found = info.files_found;
        self.status.files_deleted = info.files_deleted;
        self.status.bytes_found = info.bytes_found;
        self.status.bytes_deleted = info.bytes_deleted;
        self.status.folders_togo = info.folders_togo;

        // The tick's error slices are only valid during this call; keep
        // copies for the final report.
        self.scanner_err.extend_from_slice(info.scanner_errors);
        self.deleter_err.extend_from_slice(info.deleter_errors);
        self.status.scanner_errors = self.scanner_err.len() as u64;
        self.status.deleter_errors = self.deleter_err.len() as u64;

        if let Some(reporter) = &mut self.reporter {
            reporter.update(&self.status, info.done);
        }

        !self.cancel.load(Ordering::Relaxed)
    }
}

fn run() -> Result<ExitCode> {
    let args = CliArgs::parse();

    setup_logging(args.verbose);

    let conf = match EraseConfig::from_args(&args) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(RC_INVALID_ARG));
        }
    };

    let (path, attrs) = match vet_path(&args.path) {
        Ok(vetted) => vetted,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(path_error_code(&e)));
        }
    };

    if !confirm(&args, &path)? {
        return Ok(ExitCode::from(RC_NOT_CONFIRMED));
    }

    // First Ctrl-C asks the machine to stop via the tick callback; the
    // second one force-exits.
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = Arc::clone(&cancel);
    let interrupts = Arc::new(AtomicU32::new(0));
    ctrlc::set_handler(move || {
        if interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\nInterrupt received, stopping...");
            eprintln!("Press Ctrl+C again to force exit immediately.");
            cancel_handler.store(true, Ordering::SeqCst);
        } else {
            eprintln!("\nForced exit!");
            std::process::exit(130);
        }
    })
    .context("Failed to set signal handler")?;

    let mode_label = if args.preview {
        "preview (scan only)"
    } else if args.staged {
        "staged (scan, then delete)"
    } else {
        "delete"
    };

    if !args.quiet {
        progress::print_header(&path.display().to_string(), mode_label, conf.worker_count());
    }

    let root = Folder::root(path, attrs);
    let mut ctx = Context {
        status: Status::default(),
        scanner_err: Vec::new(),
        deleter_err: Vec::new(),
        cancel,
        reporter: (!args.quiet).then(|| ProgressReporter::new(args.one_liner, args.preview)),
    };

    let started = Instant::now();
    let result = run_modes(&args, &root, &conf, &mut ctx);
    let duration = started.elapsed();

    if let Some(reporter) = &ctx.reporter {
        reporter.finish_and_clear();
    }

    match result {
        Ok(()) => {}
        Err(MachineError::Cancelled) => {
            eprintln!("Cancelled.");
            return Ok(ExitCode::from(RC_CANCELLED));
        }
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(RC_UNLIKELY));
        }
    }

    let err_count = ctx.scanner_err.len() + ctx.deleter_err.len();

    if !args.quiet {
        progress::print_summary(
            &ctx.status,
            args.preview,
            duration,
            err_count > 0 && !args.list_errors,
        );
    }

    if args.list_errors && err_count > 0 {
        progress::print_errors(&ctx.scanner_err, &ctx.deleter_err);
    }

    let mut rc = RC_OK;
    if err_count > 0 {
        rc = RC_OK_WITH_ERRORS;
        let mut n = err_count;
        while n >= 10 {
            rc += 1;
            n /= 10;
        }
    }

    Ok(ExitCode::from(rc))
}

fn run_modes(
    args: &CliArgs,
    root: &Arc<Folder>,
    conf: &EraseConfig,
    ctx: &mut Context,
) -> std::result::Result<(), MachineError> {
    if args.preview {
        return machine::scan(root, conf, |info| ctx.on_tick(info));
    }

    if args.staged {
        machine::scan(root, conf, |info| ctx.on_tick(info))?;
        return machine::delete(root, true, conf, |info| ctx.on_tick(info));
    }

    machine::delete(root, false, conf, |info| ctx.on_tick(info))
}

fn confirm(args: &CliArgs, path: &Path) -> Result<bool> {
    if args.preview || args.yes {
        return Ok(true);
    }

    print!("Remove [{}] and all its contents? ", path.display());
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(false);
    }

    let answer = line.trim().to_ascii_lowercase();
    Ok(matches!(answer.as_str(), "y" | "yes" | "yep" | "yup"))
}

fn path_error_code(err: &ConfigError) -> u8 {
    match err {
        ConfigError::PathNotFound { .. } => RC_PATH_NOT_FOUND,
        ConfigError::NotADirectory { .. } => RC_PATH_IS_FILE,
        ConfigError::FilesystemRoot => RC_PATH_IS_ROOT,
        ConfigError::RestrictedPath { .. } => RC_PATH_RESTRICTED,
        ConfigError::CannotCheck { .. } => RC_PATH_CANT_CHECK,
        _ => RC_INVALID_ARG,
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("zapdir=debug,warn")
    } else {
        EnvFilter::new("zapdir=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr)
        .init();
}
