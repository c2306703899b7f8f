use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "totalip-relay")]
#[command(version)]
#[command(about = "Relay the TotalIP socket feed into the publishing API")]
pub struct Args {
    /// TOML file with a [totalip] table; TOTALIP_* environment variables override it
    #[arg(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging and one delivery at a time
    #[arg(long, short)]
    pub verbose: bool,

    /// Validate the configuration, print it with the API key masked, and exit
    #[arg(long)]
    pub check: bool,
}

impl Args {
    /// Default `tracing` directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Concurrency cap after the verbose override.
    pub fn effective_concurrency(&self, configured: usize) -> usize {
        if self.verbose {
            1
        } else {
            configured
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["totalip-relay"]);
        assert!(args.config.is_none());
        assert!(!args.verbose);
        assert!(!args.check);
        assert_eq!(args.log_directive(), "info");
        assert_eq!(args.effective_concurrency(5), 5);
    }

    #[test]
    fn test_args_parse_config_path() {
        let args = Args::parse_from(["totalip-relay", "--config", "/etc/totalip.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/totalip.toml")));
    }

    #[test]
    fn test_args_short_flags() {
        let args = Args::parse_from(["totalip-relay", "-c", "relay.toml", "-v"]);
        assert_eq!(args.config, Some(PathBuf::from("relay.toml")));
        assert!(args.verbose);
    }

    #[test]
    fn test_verbose_forces_single_delivery() {
        let args = Args::parse_from(["totalip-relay", "--verbose"]);
        assert_eq!(args.log_directive(), "debug");
        assert_eq!(args.effective_concurrency(8), 1);
    }

    #[test]
    fn test_check_flag() {
        let args = Args::parse_from(["totalip-relay", "--check"]);
        assert!(args.check);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Args::try_parse_from(["totalip-relay", "--bogus"]).is_err());
    }
}
