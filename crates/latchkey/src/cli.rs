use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "Token session store maintenance")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to latchkey.toml when present)
    #[arg(short, long, global = true, env = "LATCHKEY_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply database migrations (no-op for the memory backend)
    Migrate,
    /// Connect to the configured backend and check it responds
    Check {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Purge expired sessions
    Sweep {
        /// Keep running on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Print the effective configuration with secrets masked
    Config,
}
