//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// tunhost - uid attribution and lifecycle host for an embedded traffic engine
#[derive(Parser, Debug)]
#[command(name = "tunhost")]
#[command(author, version, about)]
#[command(after_help = "EXAMPLES:
    # Run as the background (engine-hosting) process
    tunhost --process-name io.tunhost:bg

    # Ask the background process to start, reload or stop the service
    tunhost start
    tunhost reload
    tunhost stop

    # Which app owns uid 10123?
    tunhost resolve-uid 10123

    # Which app owns a live TCP connection?
    tunhost lookup-connection --protocol tcp 10.0.0.2:40000 1.1.1.1:443
")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Process name to classify this process by (defaults to the OS-reported name)
    #[arg(short, long, global = true)]
    pub process_name: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the host and serve the control socket (default if no command specified)
    Run,

    /// Start the service in the background process
    Start,

    /// Reload the running service
    Reload,

    /// Stop the service
    Stop,

    /// Show the service state
    Status,

    /// Resolve a uid to its package and label
    ResolveUid {
        uid: u32,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Resolve a live connection to the uid and package owning it
    LookupConnection {
        /// Protocol (tcp, udp, icmp, icmpv6)
        #[arg(short = 'P', long, default_value = "tcp")]
        protocol: String,

        /// Local address, e.g. 10.0.0.2:40000
        source: SocketAddr,

        /// Remote address, e.g. 1.1.1.1:443
        destination: SocketAddr,
    },

    /// Show loaded configuration
    ShowConfig {
        /// Output format (toml, json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Validate configuration file
    Validate,

    /// Show version and build info
    Version,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_none() {
        let args = Args::try_parse_from(["tunhost"]).unwrap();
        assert!(args.command.is_none());
        assert!(!args.debug);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["tunhost", "start", "--config", "/tmp/t.toml", "--debug"]).unwrap();
        assert!(matches!(args.command, Some(Command::Start)));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/t.toml")));
        assert!(args.debug);
    }

    #[test]
    fn test_lookup_connection_args() {
        let args = Args::try_parse_from([
            "tunhost",
            "lookup-connection",
            "-P",
            "udp",
            "10.0.0.2:5353",
            "224.0.0.251:5353",
        ])
        .unwrap();
        match args.command {
            Some(Command::LookupConnection {
                protocol,
                source,
                destination,
            }) => {
                assert_eq!(protocol, "udp");
                assert_eq!(source.port(), 5353);
                assert_eq!(destination, "224.0.0.251:5353".parse().unwrap());
            }
            other => panic!("Wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_uid_rejects_negative() {
        assert!(Args::try_parse_from(["tunhost", "resolve-uid", "-5"]).is_err());
    }
}
