use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use mailrelay::{Config, Envelope, IntakeServer, MailAddress, Relay, SenderGate, relay};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;

use args::Cli;

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn check_ip(gate: &SenderGate, ip: Option<&str>) -> Result<()> {
    let Some(ip) = ip.filter(|ip| !ip.trim().is_empty()) else {
        bail!("an IP address is required with --check-ip; pass it with --ip");
    };
    let verdict = if gate.is_blocked(ip) { "NOT " } else { "" };
    println!("IP address {ip} is {verdict}allowed to send email");
    Ok(())
}

fn send_test(config: &Config, port: u16, sender: &str, rcpt: &str) -> Result<()> {
    let from: MailAddress = sender.parse().context("parsing --sender")?;
    let to: MailAddress = rcpt.parse().context("parsing --rcpt")?;
    let body = format!(
        "From: {sender}\nSubject: Test message\n\nThis is a test email from mailrelay.\n"
    );
    let envelope = Envelope::new(from, "")
        .with_recipient(to)
        .with_body(body);

    let host = match config.listen_addr()?.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    relay::submit(&host.to_string(), port, &envelope, Some(config.timeout()))
        .context("sending test message")?;
    info!(%sender, %rcpt, "test message accepted");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = Config::from_path(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let gate = Arc::new(SenderGate::new(
        config.sender_rules().context("loading allowed senders")?,
    ));

    if cli.check_ip {
        return check_ip(&gate, cli.ip.as_deref());
    }

    let relay = Arc::new(Relay::new(config.relay_options()?, Arc::clone(&gate)));
    let server = IntakeServer::bind(config.listen_addr()?, config.intake_options(), relay)
        .context("starting server")?;

    if cli.test {
        let (Some(sender), Some(rcpt)) = (cli.sender.as_deref(), cli.rcpt.as_deref()) else {
            bail!("--test needs both --sender and --rcpt");
        };
        let port = server.local_addr()?.port();
        thread::spawn(move || server.serve());
        return send_test(&config, port, sender, rcpt);
    }

    server.serve().context("serving")?;
    Ok(())
}
