use std::path::PathBuf;

use clap::Parser;
use mailrelay::config::DEFAULT_PATH;

#[derive(Debug, Parser)]
#[command(
    name = "mailrelay",
    version,
    about = "Relay mail from a local listener to an upstream SMTP server"
)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, default_value = DEFAULT_PATH)]
    pub config: PathBuf,

    /// log at debug level (RUST_LOG takes precedence)
    #[arg(long)]
    pub verbose: bool,

    /// send a test message through the local listener, then exit
    #[arg(long, requires_all = ["sender", "rcpt"], conflicts_with = "check_ip")]
    pub test: bool,

    /// sender address for --test
    #[arg(long)]
    pub sender: Option<String>,

    /// recipient address for --test
    #[arg(long)]
    pub rcpt: Option<String>,

    /// report whether an address may send mail through the relay, then exit
    #[arg(long = "check-ip", alias = "checkIP", requires = "ip")]
    pub check_ip: bool,

    /// address for --check-ip
    #[arg(long)]
    pub ip: Option<String>,
}
