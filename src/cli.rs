use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use crate::{command, config};

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "container-remote")]
#[command(
    about = "Stage host directories into a private container and relay shell commands into it"
)]
#[command(after_help = "Without a subcommand, starts the interactive shell.")]
struct Cli {
    /// Config file (default: ./configs/config.yaml, ./.container-remote.yaml,
    /// then ~/.config/container-remote/config.yaml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Adopt an existing container with the configured name instead of replacing it.
    /// The adopted container keeps its original volumes, so mounts staged by
    /// this run do not appear under the remote root.
    #[arg(long, global = true)]
    reuse: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the environment and relay commands typed on stdin
    Shell,

    /// Start the environment, run one command, then tear everything down
    Exec {
        /// Command to run. A single argument is a shell line; several are
        /// quoted and joined.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Write an example .container-remote.yaml to the current directory
    Init,

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => command::shell::run(config_path, cli.reuse),
        Commands::Exec { command } => command::exec::run(config_path, cli.reuse, &command),
        Commands::Init => config::Config::init(),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_shell() {
        let cli = Cli::try_parse_from(["container-remote", "--reuse"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.reuse);
    }

    #[test]
    fn test_exec_collects_trailing_args() {
        let cli = Cli::try_parse_from([
            "container-remote",
            "exec",
            "--config",
            "cfg.yaml",
            "--",
            "ls",
            "-la",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("cfg.yaml")));
        match cli.command {
            Some(Commands::Exec { command }) => assert_eq!(command, vec!["ls", "-la"]),
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(Cli::try_parse_from(["container-remote", "exec"]).is_err());
    }
}
