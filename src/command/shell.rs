//! Interactive loop relaying stdin lines into the container.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{error, info};

use super::{finish, start_env};
use crate::remote::RemoteEnv;

const PROMPT: &str = "Enter remote command (type 'exit' to quit): ";

pub fn run(config_path: Option<&Path>, reuse: bool) -> Result<()> {
    let mut env = start_env(config_path, reuse)?;

    // Ctrl-C must not kill the process before teardown runs; it only ends
    // the loop once the pending read returns.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
            eprintln!("\nInterrupted. Press Enter to leave; cleanup will run.");
        });
    }

    let stdin = std::io::stdin();
    let result = repl(&env, stdin.lock(), std::io::stdout().lock(), &interrupted);
    finish(&mut env);
    result
}

fn repl<R: BufRead, W: Write>(
    env: &RemoteEnv,
    mut input: R,
    mut out: W,
    interrupted: &AtomicBool,
) -> Result<()> {
    loop {
        if interrupted.load(Ordering::SeqCst) {
            writeln!(out, "Exiting remote environment...")?;
            break;
        }
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .context("Failed to read command from stdin")?;
        if read == 0 {
            writeln!(out)?;
            writeln!(out, "Exiting remote environment...")?;
            break;
        }
        if interrupted.load(Ordering::SeqCst) {
            continue;
        }

        let cmd = line.trim_end_matches(['\n', '\r']);
        if cmd.trim().eq_ignore_ascii_case("exit") {
            writeln!(out, "Exiting remote environment...")?;
            break;
        }
        if cmd.trim().is_empty() {
            continue;
        }

        info!(command = cmd, "shell:command");
        match env.remote(cmd) {
            Ok(output) => writeln!(out, "{}", output)?,
            Err(e) => {
                error!(command = cmd, error = ?e, "Failed to execute command");
                eprintln!("Failed to execute command: {}, Error: {:#}", cmd, e);
            }
        }
    }
    Ok(())
}
