//! Command-line GC settings.

use clap::Args;
use std::time::Duration;
use wakeup_core::SwarmConfig;

/// GC tuning flags shared by the daemon binaries.
#[derive(Args, Debug, Clone)]
pub struct GcArgs {
    /// Milliseconds between GC ticks
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    pub gc_interval_ms: u64,

    /// Consecutive idle ticks before a session is reclaimed
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub gc_idle_ticks: u32,
}

impl From<&GcArgs> for SwarmConfig {
    fn from(args: &GcArgs) -> Self {
        Self {
            gc_interval: Duration::from_millis(args.gc_interval_ms),
            gc_idle_ticks: args.gc_idle_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        gc: GcArgs,
    }

    #[test]
    fn test_defaults_match_swarm_defaults() {
        let cli = Cli::parse_from(["test"]);
        let config = SwarmConfig::from(&cli.gc);
        let defaults = SwarmConfig::default();

        assert_eq!(config.gc_interval, defaults.gc_interval);
        assert_eq!(config.gc_idle_ticks, defaults.gc_idle_ticks);
    }

    #[test]
    fn test_flags_override() {
        let cli = Cli::parse_from(["test", "--gc-interval-ms", "50", "--gc-idle-ticks", "2"]);
        let config = SwarmConfig::from(&cli.gc);

        assert_eq!(config.gc_interval, Duration::from_millis(50));
        assert_eq!(config.gc_idle_ticks, 2);
    }

    #[test]
    fn test_zero_ticks_rejected() {
        assert!(Cli::try_parse_from(["test", "--gc-idle-ticks", "0"]).is_err());
        assert!(Cli::try_parse_from(["test", "--gc-interval-ms", "0"]).is_err());
    }
}
