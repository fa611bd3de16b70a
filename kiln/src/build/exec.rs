// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Running build subprocesses: capture, wall-clock timeouts, and
//! process-group termination.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use itertools::Itertools;

use crate::error::{Error, ErrorKind, Result};

/// What a finished subprocess looked like.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Interleaved stdout + stderr, captured verbatim.
    pub output: String,
    pub timed_out: bool,
}

/// Renders an argv for logs and error messages.
pub fn render_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_escape::escape(a.as_str().into()))
        .join(" ")
}

/// Runs `argv`, capturing interleaved output. With a timeout, the process
/// group receives SIGTERM at the deadline and is reaped before reporting.
pub fn run_command(argv: &[String], timeout: Option<Duration>) -> Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::new(ErrorKind::BadToolchain, "empty command line"))?;

    tracing::debug!("running: {}", render_argv(argv));

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    if timeout.is_some() {
        use std::os::unix::process::CommandExt;
        // A fresh process group, so the deadline can terminate helpers the
        // command spawned too.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }
    }

    let mut child = command.spawn().map_err(|e| {
        Error::with_source(
            ErrorKind::BadToolchain,
            format!("failed to spawn {:?}", program),
            e,
        )
    })?;

    // Drain both pipes off-thread so a chatty process can't deadlock on a
    // full pipe while we wait for it.
    let mut stdout_pipe = child.stdout.take().expect("stdout is piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr is piped");
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout_pipe.read_to_string(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf);
        buf
    });

    let mut timed_out = false;
    let status = match timeout {
        None => child
            .wait()
            .map_err(|e| Error::from_io(e, format!("waiting for {:?}", program)))?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                if let Some(status) = child
                    .try_wait()
                    .map_err(|e| Error::from_io(e, format!("waiting for {:?}", program)))?
                {
                    break status;
                }
                if Instant::now() >= deadline {
                    timed_out = true;
                    terminate_group(&child);
                    break child.wait().map_err(|e| {
                        Error::from_io(e, format!("reaping {:?}", program))
                    })?;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    };

    let mut output = stdout_reader.join().unwrap_or_default();
    let stderr_text = stderr_reader.join().unwrap_or_default();
    if !stderr_text.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr_text);
    }

    Ok(CommandOutput {
        success: status.success() && !timed_out,
        exit_code: status.code(),
        output,
        timed_out,
    })
}

#[cfg(unix)]
fn terminate_group(child: &std::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    if let Ok(pid) = i32::try_from(child.id()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_group(_child: &std::process::Child) {}
