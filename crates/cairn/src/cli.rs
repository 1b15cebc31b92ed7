//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

pub use crate::commands::backup::BackupArgs;

/// Cairn - streamed, throttled directory backups
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to cairn.yaml config file
    #[arg(short, long, global = true, env = "CAIRN_CONFIG")]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive a directory into a .tar.gz backup
    Backup(BackupArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup() {
        let cli = Cli::parse_from([
            "cairn",
            "-vv",
            "backup",
            "/srv/data",
            "--output",
            "/backups",
            "--file",
            "world/level.dat",
            "--file",
            "server.properties",
            "--compression",
            "best_compression",
            "--write-limit",
            "10",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Backup(args) = cli.command;
        assert_eq!(args.source, Utf8PathBuf::from("/srv/data"));
        assert_eq!(args.output, "/backups");
        assert_eq!(args.file.len(), 2);
        assert_eq!(args.compression.as_deref(), Some("best_compression"));
        assert_eq!(args.write_limit, Some(10));
    }
}
