// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Startup and shutdown plumbing for the CLI binary.

use std::ffi::OsStr;
use std::fmt::Debug;
use std::process::ExitCode;

use itertools::Itertools;

mod logging;

pub use crate::logging::*;

/// Implemented by top-level error types that map to process exit codes.
///
/// The default of 1 matches the "user error" convention; environment and
/// build failures override it.
pub trait ToExitCode {
    fn exit_code(&self) -> u8 {
        1
    }
}

/// Runs a CLI entry point with the common bracketing: install the logging
/// subscriber described by the `KILN_LOG_*` environment, echo the escaped
/// command line, run `main`, and turn its result into the process exit
/// code.
///
/// Logging trouble (an unwritable log file, a malformed filter) must never
/// keep the tool itself from running; it is reported once on stderr and
/// the invocation proceeds without a subscriber.
pub fn cli_main<T, E>(main: impl FnOnce() -> Result<T, E>) -> ExitCode
where
    E: Debug + ToExitCode,
{
    let _log_guard = match LoggingConfig::from_env().and_then(LoggingConfig::setup) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!(
                "{}: warning: logging disabled: {:#}",
                current_process_name(),
                e
            );
            None
        }
    };
    log_current_command_line();
    handle_top_level_result(main())
}

/// Logs the command line of the current process. [`cli_main`] already does
/// this for you.
pub fn log_current_command_line() {
    let escaped_command = std::env::args()
        .map(|s| shell_escape::escape(s.into()))
        .join(" ");
    tracing::info!("COMMAND: {}", escaped_command);
}

/// Turns the top-level [`Result`] into the process exit code, reporting a
/// failure on stderr with its stable marker intact.
pub fn handle_top_level_result<T, E: Debug + ToExitCode>(result: Result<T, E>) -> ExitCode {
    match result {
        Err(error) => {
            eprintln!("{}: error: {:?}", current_process_name(), error);
            ExitCode::from(error.exit_code())
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

/// The current process name, or `kiln` if it cannot be determined.
pub(crate) fn current_process_name() -> String {
    let current_exe = std::env::current_exe().unwrap_or_default();
    current_exe
        .file_name()
        .unwrap_or(OsStr::new("kiln"))
        .to_string_lossy()
        .into_owned()
}
