//! oscmidi - OSC to MIDI control change bridge
//!
//! Receives OSC messages over UDP and sends each one as a MIDI control change.
//! Unknown addresses are assigned a free controller number on first sight and
//! the assignments are kept in a JSON file across restarts.

pub mod config;
pub mod error;
pub mod mapping;
pub mod midi;
pub mod osc;
pub mod translator;

pub use error::{MappingError, PoolExhausted, TranslateError};
pub use mapping::{Mapping, MappingStore, PersistOnExit};
pub use midi::{ControlChange, MidiSink};
pub use translator::Translator;
