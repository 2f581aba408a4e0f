//! MIDI output
//!
//! Control change messages, the OSC value → MIDI value conversion, and the
//! sink that puts bytes on an output port.

use anyhow::{anyhow, Context, Result};
use colored::*;
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info};

/// Status byte of a control change on MIDI channel 1
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Client name registered with the MIDI backend
const CLIENT_NAME: &str = "oscmidi";

/// Control change message on MIDI channel 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    pub controller: u8,
    pub value: u8,
}

impl ControlChange {
    pub fn new(controller: u8, value: u8) -> Self {
        Self { controller, value }
    }

    /// Message for `controller` carrying the value of the first OSC argument
    pub fn from_args(controller: u8, args: &[f64]) -> Self {
        Self::new(controller, cc_value(args))
    }

    /// Encode as `[0xB0, controller, value]`.
    ///
    /// Bytes are not masked to 7 bits.
    pub fn to_bytes(&self) -> [u8; 3] {
        [CONTROL_CHANGE, self.controller, self.value]
    }
}

impl fmt::Display for ControlChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CC cc:{} v:{}", self.controller, self.value)
    }
}

/// Convert OSC arguments to a controller value.
///
/// The first argument is read as a 0.0-1.0 float and scaled to 0-127, rounding
/// half to even. No arguments gives 0. Input outside 0.0-1.0 is not clamped:
/// the cast saturates at the `u8` bounds, so 2.0 becomes 254 and negative
/// values become 0.
pub fn cc_value(args: &[f64]) -> u8 {
    match args.first() {
        Some(v) => (v * 127.0).round_ties_even() as u8,
        None => 0,
    }
}

/// Destination for raw MIDI bytes
pub trait MidiSink: Send + Sync {
    /// Transmit one complete MIDI message
    fn send(&self, bytes: &[u8]) -> Result<()>;
}

/// MIDI sink backed by a midir output connection
pub struct MidirSink {
    conn: Mutex<MidiOutputConnection>,
    port_name: String,
}

impl MidirSink {
    /// Open the output port at `port_index`.
    ///
    /// When the system has no output ports at all, a virtual port named
    /// `virtual_name` is created instead (Unix only).
    pub fn open(port_index: usize, virtual_name: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to create MIDI output")?;

        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect();
        info!("Available MIDI output ports: {:?}", names);

        if ports.is_empty() {
            let conn = open_virtual(midi_out, virtual_name)?;
            info!("Opened virtual MIDI port: {}", virtual_name);
            return Ok(Self {
                conn: Mutex::new(conn),
                port_name: virtual_name.to_string(),
            });
        }

        let port = ports.get(port_index).ok_or_else(|| {
            anyhow!(
                "MIDI port index {} out of range ({} ports available)",
                port_index,
                ports.len()
            )
        })?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("port {port_index}"));

        let conn = midi_out
            .connect(port, CLIENT_NAME)
            .map_err(|e| anyhow!("Failed to connect to MIDI port '{}': {}", port_name, e))?;

        info!("Selected MIDI port {}: {}", port_index, port_name);
        Ok(Self {
            conn: Mutex::new(conn),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiSink for MidirSink {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        self.conn
            .lock()
            .send(bytes)
            .context("Failed to send MIDI message")?;
        debug!("Sent: {}", format_hex(bytes));
        Ok(())
    }
}

#[cfg(unix)]
fn open_virtual(midi_out: MidiOutput, name: &str) -> Result<MidiOutputConnection> {
    use midir::os::unix::VirtualOutput;

    midi_out
        .create_virtual(name)
        .map_err(|e| anyhow!("Failed to open virtual MIDI port '{}': {}", name, e))
}

#[cfg(not(unix))]
fn open_virtual(_midi_out: MidiOutput, name: &str) -> Result<MidiOutputConnection> {
    Err(anyhow!(
        "No MIDI output ports found and virtual port '{}' is not supported on this platform",
        name
    ))
}

/// Names of the available MIDI output ports, in index order
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to create MIDI output")?;

    let mut port_names = Vec::new();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// Print the output ports with the index `--midi` expects
pub fn print_ports() -> Result<()> {
    let ports = list_output_ports()?;

    println!("\n{}", "MIDI Output Ports:".bold());
    if ports.is_empty() {
        println!("  {}", "(none, a virtual port will be opened)".dimmed());
    }
    for (i, name) in ports.iter().enumerate() {
        println!("  [{}] {}", i.to_string().yellow(), name.green());
    }
    println!();

    Ok(())
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
