//! preview-fleet CLI - manage ephemeral per-PR preview environments.
//!
//! This is the entry point for the `preview-fleet` binary.

mod commands;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::Status;

/// preview-fleet - ephemeral preview environments for pull requests.
#[derive(Parser, Debug)]
#[command(name = "preview-fleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log every mutation instead of performing it. `DRY_RUN` is read with the
    /// rest of the configuration.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Directory holding the metadata store.
    #[arg(
        long,
        global = true,
        env = "PREVIEW_DATA_DIR",
        default_value = ".preview-fleet"
    )]
    data_dir: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Create (or return) the preview environment for a pull request.
    Create {
        /// Pull request number.
        pr_number: u32,
        /// Branch name; defaults to `$GITHUB_HEAD_REF`.
        #[arg(env = "GITHUB_HEAD_REF", default_value = "")]
        branch: String,
    },
    /// Delete a preview environment and all of its resources.
    Delete {
        /// Environment name, e.g. `pr-42-feature-x`.
        preview_name: String,
    },
    /// List preview environments.
    List {
        /// Show resources, errors and capacity.
        #[arg(long)]
        detailed: bool,
    },
    /// Delete expired environments, then orphaned resources.
    Cleanup,
    /// Probe the health of every active environment.
    Monitor,
    /// Run cleanup and monitor on an interval until interrupted.
    Watch {
        /// Minutes between cycles.
        #[arg(long, default_value_t = 180, value_parser = clap::value_parser!(u64).range(1..))]
        interval_minutes: u64,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "warn,preview_fleet=debug"
    } else {
        "warn,preview_fleet=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Help and version requests succeed; every other parse error is invalid usage.
fn usage_status(error: &clap::Error) -> Status {
    if error.use_stderr() {
        Status::Failure
    } else {
        Status::Success
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return usage_status(&e).into();
        }
    };
    init_logging(args.verbose);

    match commands::run(args).await {
        Ok(status) => status.into(),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn create_with_branch() {
        let args = parse(&["preview-fleet", "create", "42", "feature/x"]);
        assert_eq!(
            args.command,
            Command::Create {
                pr_number: 42,
                branch: "feature/x".into()
            }
        );
        assert_eq!(args.data_dir, PathBuf::from(".preview-fleet"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = parse(&["preview-fleet", "list", "--detailed", "--dry-run", "-v"]);
        assert!(args.dry_run);
        assert!(args.verbose);
        assert_eq!(args.command, Command::List { detailed: true });
    }

    #[test]
    fn watch_interval() {
        let args = parse(&["preview-fleet", "watch"]);
        assert_eq!(
            args.command,
            Command::Watch {
                interval_minutes: 180
            }
        );
        assert!(Args::try_parse_from(["preview-fleet", "watch", "--interval-minutes", "0"]).is_err());
    }

    fn usage(argv: &[&str]) -> Status {
        usage_status(&Args::try_parse_from(argv).unwrap_err())
    }

    #[test]
    fn invalid_usage_exits_one() {
        assert_eq!(usage(&["preview-fleet", "create", "not-a-number"]), Status::Failure);
        assert_eq!(usage(&["preview-fleet", "delete"]), Status::Failure);
        assert_eq!(usage(&["preview-fleet", "frobnicate"]), Status::Failure);
    }

    #[test]
    fn help_and_version_exit_zero() {
        assert_eq!(usage(&["preview-fleet", "--help"]), Status::Success);
        assert_eq!(usage(&["preview-fleet", "help"]), Status::Success);
        assert_eq!(usage(&["preview-fleet", "--version"]), Status::Success);
    }

    #[test]
    fn dry_run_env_does_not_break_parsing() {
        std::env::set_var("DRY_RUN", "1");
        let args = Args::try_parse_from(["preview-fleet", "cleanup"]);
        std::env::remove_var("DRY_RUN");

        let args = args.unwrap();
        assert!(!args.dry_run);
        assert_eq!(args.command, Command::Cleanup);
    }
}
