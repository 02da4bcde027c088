//! One-shot `exec`: start the environment, run one command, tear down.

use std::path::Path;

use anyhow::{Context, Result, bail};

use super::{finish, start_env};

pub fn run(config_path: Option<&Path>, reuse: bool, args: &[String]) -> Result<()> {
    let line = command_line(args)?;

    let mut env = start_env(config_path, reuse)?;
    let result = env.remote(line.as_str());
    finish(&mut env);

    println!("{}", result?);
    Ok(())
}

/// A single argument is taken as a shell line as-is; several are quoted
/// and joined so each stays one word.
fn command_line(args: &[String]) -> Result<String> {
    match args {
        [] => bail!("No command specified. Usage: container-remote exec -- <command...>"),
        [line] => Ok(line.clone()),
        _ => shlex::try_join(args.iter().map(String::as_str))
            .context("Command arguments cannot be quoted for the shell"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_argument_is_a_shell_line() {
        let line = command_line(&args(&["ls -la | wc -l"])).unwrap();
        assert_eq!(line, "ls -la | wc -l");
    }

    #[test]
    fn test_multiple_arguments_are_quoted() {
        let line = command_line(&args(&["grep", "-r", "two words", "/remote_root"])).unwrap();
        assert_eq!(line, "grep -r 'two words' /remote_root");
    }

    #[test]
    fn test_no_arguments() {
        assert!(command_line(&[]).is_err());
    }
}
