//! OSC event → MIDI control change translation
//!
//! Each event is classified once: a mapped address is sent, an unknown address
//! is learned (when learning is on) and then sent, anything else is dropped.

use crate::error::TranslateError;
use crate::mapping::{Lookup, Mapping, MappingStore, POOL_CAPACITY};
use crate::midi::{format_hex, ControlChange, MidiSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Event counters, readable while the translator is running
#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    learned: AtomicU64,
    suppressed: AtomicU64,
}

/// Point-in-time copy of the translator's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslatorStats {
    pub sent: u64,
    pub learned: u64,
    pub suppressed: u64,
}

/// Turns OSC events into control changes on a MIDI sink
pub struct Translator {
    store: Arc<MappingStore>,
    sink: Arc<dyn MidiSink>,
    learn: bool,
    counters: Counters,
}

impl Translator {
    /// Create a translator
    ///
    /// # Arguments
    /// * `store` - Shared mapping, also held by the shutdown persistence guard
    /// * `sink` - Where the encoded messages go
    /// * `learn` - Whether [`Translator::handle`] assigns numbers to new addresses
    pub fn new(store: Arc<MappingStore>, sink: Arc<dyn MidiSink>, learn: bool) -> Self {
        Self {
            store,
            sink,
            learn,
            counters: Counters::default(),
        }
    }

    pub fn learn_enabled(&self) -> bool {
        self.learn
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    /// Translate an event with the configured learn setting
    pub fn handle(&self, address: &str, args: &[f64]) -> Result<ControlChange, TranslateError> {
        self.translate(address, args, self.learn)
    }

    /// Translate one event and send the result.
    ///
    /// Returns the message that was sent. `NotMapped` and `PoolExhausted`
    /// mean the event was dropped and the caller should carry on; `Sink`
    /// means the output port failed.
    pub fn translate(
        &self,
        address: &str,
        args: &[f64],
        learn: bool,
    ) -> Result<ControlChange, TranslateError> {
        let controller = match self.store.resolve_or_allocate(address, learn) {
            Ok(Lookup::Mapped(controller)) => controller,
            Ok(Lookup::Learned(controller)) => {
                self.counters.learned.fetch_add(1, Ordering::Relaxed);
                info!("New mapping: {} -> CC {}", address, controller);
                controller
            }
            Ok(Lookup::Unmapped) => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "No mapping for {} and learning is disabled, not sending MIDI",
                    address
                );
                return Err(TranslateError::NotMapped {
                    address: address.to_string(),
                });
            }
            Err(exhausted) => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                self.report_exhausted(address);
                return Err(TranslateError::PoolExhausted {
                    address: exhausted.address,
                });
            }
        };

        let message = ControlChange::from_args(controller, args);
        let bytes = message.to_bytes();

        self.sink
            .send(&bytes)
            .map_err(|source| TranslateError::Sink {
                address: address.to_string(),
                source,
            })?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);

        info!("{} {:?} ==> [{}]", address, args, format_hex(&bytes));
        Ok(message)
    }

    fn report_exhausted(&self, address: &str) {
        warn!("{}", exhaustion_report(address, &self.store.snapshot()));
    }

    pub fn stats(&self) -> TranslatorStats {
        TranslatorStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            learned: self.counters.learned.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
        }
    }
}

/// Operator message for a full pool, with the whole mapping attached
fn exhaustion_report(address: &str, mapping: &Mapping) -> String {
    let dump = serde_json::to_string_pretty(mapping).unwrap_or_else(|_| format!("{mapping:?}"));
    format!(
        "Too many MIDI mappings ({} in use, {} learnable besides /ping), dropping {}\n{}",
        mapping.len(),
        POOL_CAPACITY,
        address,
        dump
    )
}
