use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "tweetpulse", about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the ingestion pipeline until interrupted
    Start {
        /// Override NUM_WORKERS from the environment
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print cache and staging counters, then exit
    Status,

    /// Delete staging files older than the cutoff
    Clean {
        #[arg(long, default_value_t = 7)]
        older_than_days: u32,
    },
}
