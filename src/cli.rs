use clap::{Parser, Subcommand};

/// motwatch: MOT status checks and bulk refresh for vehicle records
#[derive(Parser)]
#[command(name = "motwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API (and the scheduled refresh job, if enabled)
    Serve {
        /// Port to bind (defaults to MOTWATCH_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check a single vehicle's MOT status
    Check {
        registration: String,
        /// Print the result without writing it to the database
        #[arg(long)]
        no_persist: bool,
    },

    /// Bulk-check vehicles (explicit list, or stale vehicles from the database)
    Batch(BatchArgs),

    /// Look up a vehicle with the DVLA Vehicle Enquiry Service
    Vehicle {
        registration: String,
        /// Store the returned details
        #[arg(long)]
        save: bool,
    },

    /// Show recent bulk runs
    Runs {
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Apply database migrations
    Migrate,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BatchArgs {
    /// Registrations to check; repeat or comma-separate. Omit to use the database.
    #[arg(long = "vrm", value_delimiter = ',')]
    pub registrations: Vec<String>,

    /// Maximum vehicles to take from the database
    #[arg(long, default_value = "1000")]
    pub limit: i64,

    /// Only vehicles last checked more than this many hours ago (defaults to MOTWATCH_STALE_AFTER_HOURS)
    #[arg(long)]
    pub stale_hours: Option<u64>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between chunks in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Token-bucket ceiling on upstream requests per second (0 = off)
    #[arg(long)]
    pub rate_limit_rps: Option<f64>,

    /// Retries for network/timeout/5xx failures (0 = off)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Check but keep results in memory instead of the database
    #[arg(long)]
    pub dry_run: bool,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_args_parse() {
        let cli = Cli::parse_from([
            "motwatch",
            "batch",
            "--vrm",
            "AB12CDE,XY99ZZZ",
            "--vrm",
            "LM51NOP",
            "--concurrency",
            "4",
            "--dry-run",
        ]);
        match cli.command {
            Some(Commands::Batch(args)) => {
                assert_eq!(args.registrations, vec!["AB12CDE", "XY99ZZZ", "LM51NOP"]);
                assert_eq!(args.concurrency, Some(4));
                assert!(args.dry_run);
                assert!(!args.json);
                assert_eq!(args.limit, 1000);
            }
            _ => panic!("expected batch command"),
        }
    }

    #[test]
    fn test_no_subcommand_is_allowed() {
        assert!(Cli::parse_from(["motwatch"]).command.is_none());
    }
}
