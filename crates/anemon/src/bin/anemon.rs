/// Command line client: connect to a relay and print one line per wind sample.

use std::{io, process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use anemon::{
    client,
    config::{ClientConfig, DisplayTime, HandshakeMode, DEFAULT_LOCAL_PORT, DEFAULT_REMOTE_PORT},
    init_tracing,
    output::LinePrinter,
    protocol::{
        keepalive::MessageKind,
        wind::{SampleLayout, SentinelPolicy},
    },
    scheduler::{KeepAliveCycle, Shutdown},
};

/// Stream wind telemetry from an anemometer relay.
#[derive(Parser, Debug)]
#[command(name = "anemon", version, about)]
struct Cli {
    /// Relay host name or address
    host: String,

    /// Relay port (the negotiation port with --two-phase)
    #[arg(default_value_t = DEFAULT_REMOTE_PORT)]
    port: u16,

    /// Local UDP port to bind
    #[arg(long, default_value_t = DEFAULT_LOCAL_PORT)]
    local_port: u16,

    /// Wind sample wire layout
    #[arg(long, value_enum, default_value_t = Layout::Extended)]
    layout: Layout,

    /// Negotiate on PORT, then stream telemetry from DATA_PORT
    #[arg(long, value_name = "DATA_PORT", conflicts_with = "desired_port")]
    two_phase: Option<u16>,

    /// Desired port carried in the connection request
    #[arg(long)]
    desired_port: Option<u16>,

    /// Keep-alive cycle length in ticks
    #[arg(long, default_value_t = 5)]
    cycle: usize,

    /// Cycle position that sends POLL
    #[arg(long, default_value_t = 0)]
    poll_at: usize,

    /// Cycle position that sends INFO
    #[arg(long)]
    info_at: Option<usize>,

    /// Keep-alive tick interval in milliseconds
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Seconds of relay silence before it is reported
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    /// Session identifier (random when omitted)
    #[arg(long)]
    session_id: Option<u16>,

    /// Send keep-alive frames without the session id
    #[arg(long)]
    no_id_prefix: bool,

    /// Reject wind payloads whose first byte is 1
    #[arg(long)]
    strict_sentinel: bool,

    /// Stamp samples with the relay clock instead of the local one
    #[arg(long)]
    relay_time: bool,

    /// Re-handshake this many times after a fatal transport error
    #[arg(long, default_value_t = 0)]
    reconnect: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Basic,
    Extended,
}

impl From<Layout> for SampleLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Basic => SampleLayout::Basic,
            Layout::Extended => SampleLayout::Extended,
        }
    }
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut cycle = KeepAliveCycle::new(self.cycle).with(self.poll_at, MessageKind::Poll);
        if let Some(position) = self.info_at {
            cycle = cycle.with(position, MessageKind::Info);
        }
        let handshake = match self.two_phase {
            Some(data_port) => HandshakeMode::TwoPhase { data_port },
            None => HandshakeMode::SinglePhase {
                desired_port: self.desired_port,
            },
        };
        let mut config = ClientConfig::new(&self.host)
            .with_remote_port(self.port)
            .with_local_port(self.local_port)
            .with_handshake(handshake)
            .with_prefix_session_id(!self.no_id_prefix)
            .with_keepalive(cycle, Duration::from_millis(self.interval_ms))
            .with_receive_timeout(Duration::from_secs(self.timeout_secs))
            .with_layout(self.layout.into())
            .with_reconnect_attempts(self.reconnect);
        if let Some(id) = self.session_id {
            config = config.with_session_id(id);
        }
        if self.strict_sentinel {
            config = config.with_sentinel(SentinelPolicy::Reject);
        }
        if self.relay_time {
            config = config.with_display_time(DisplayTime::Relay);
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(&cli.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        on_signal.trigger();
    }) {
        error!("failed to install signal handler: {e}");
        return ExitCode::FAILURE;
    }

    let config = cli.config();
    let printer = LinePrinter::new(io::stdout().lock());
    match client::run(&config, printer, &shutdown) {
        Ok(stats) => {
            info!("stopped: {:?}", stats);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["anemon", "relay.example"]);
        let config = cli.config();
        assert_eq!(config.host, "relay.example");
        assert_eq!(config.remote_port, 7755);
        assert_eq!(config.local_port, 7756);
        assert_eq!(config.keepalive.kind_at(0), MessageKind::Poll);
        assert_eq!(config.keepalive.kind_at(1), MessageKind::Ping);
        assert_eq!(config.layout, SampleLayout::Extended);
        assert!(config.prefix_session_id);
    }

    #[test]
    fn test_cli_variant_flags() {
        let cli = Cli::parse_from([
            "anemon",
            "relay.example",
            "7000",
            "--layout",
            "basic",
            "--two-phase",
            "7001",
            "--cycle",
            "10",
            "--info-at",
            "5",
            "--session-id",
            "4660",
            "--no-id-prefix",
            "--strict-sentinel",
            "--relay-time",
        ]);
        let config = cli.config();
        assert_eq!(config.remote_port, 7000);
        assert_eq!(config.handshake, HandshakeMode::TwoPhase { data_port: 7001 });
        assert_eq!(config.keepalive.cycle_len(), 10);
        assert_eq!(config.keepalive.kind_at(5), MessageKind::Info);
        assert_eq!(config.session_id, 0x1234);
        assert_eq!(config.keepalive_prefix(), None);
        assert_eq!(config.sentinel, SentinelPolicy::Reject);
        assert_eq!(config.display_time, DisplayTime::Relay);
        assert_eq!(config.layout, SampleLayout::Basic);
    }

    #[test]
    fn test_cli_rejects_zero_durations() {
        for flag in ["--timeout-secs", "--interval-ms"] {
            assert!(Cli::try_parse_from(["anemon", "relay.example", flag, "0"]).is_err());
            assert!(Cli::try_parse_from(["anemon", "relay.example", flag, "1"]).is_ok());
        }
    }

    #[test]
    fn test_cli_requires_host() {
        assert!(Cli::try_parse_from(["anemon"]).is_err());
    }
}
