//! Command-line configuration
//!
//! `Args` is what the user types; `BridgeConfig` is the resolved set of plain
//! values the bridge runs with.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Bridge OSC messages to MIDI control changes, learning new addresses as they arrive
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The ip to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub ip: String,

    /// The port to listen on
    #[arg(long, default_value_t = 5005)]
    pub port: u16,

    /// The MIDI output port index
    #[arg(long, default_value_t = 0)]
    pub midi: usize,

    /// File to read the OSC to MIDI mapping from
    #[arg(long, default_value = "mapping.json")]
    pub mapping_file_in: PathBuf,

    /// File to save the mapping to on exit
    #[arg(long, default_value = "mapping.json")]
    pub mapping_file_out: PathBuf,

    /// Do not map new OSC paths to MIDI
    #[arg(long)]
    pub no_learn: bool,

    /// Name of the virtual port opened when no MIDI output exists
    #[arg(long, default_value = "TouchMidi")]
    pub virtual_port: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// List available MIDI output ports and exit
    #[arg(long)]
    pub list_ports: bool,
}

/// Settings the bridge runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub listen: SocketAddr,
    pub midi_port: usize,
    pub virtual_port: String,
    pub mapping_in: PathBuf,
    pub mapping_out: PathBuf,
    pub learn: bool,
}

impl BridgeConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let ip: IpAddr = args
            .ip
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", args.ip))?;

        Ok(Self {
            listen: SocketAddr::new(ip, args.port),
            midi_port: args.midi,
            virtual_port: args.virtual_port.clone(),
            mapping_in: args.mapping_file_in.clone(),
            mapping_out: args.mapping_file_out.clone(),
            learn: !args.no_learn,
        })
    }
}
