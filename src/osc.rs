//! OSC over UDP
//!
//! Receives datagrams, decodes them with `rosc` and hands every message to
//! the translator. Bundles are flattened and their time tags ignored.

use anyhow::{Context, Result};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

use crate::error::TranslateError;
use crate::translator::Translator;

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65_536;

/// UDP listener feeding a [`Translator`]
pub struct OscListener {
    socket: UdpSocket,
}

impl OscListener {
    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind OSC socket on {}", addr))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to read OSC socket address")
    }

    /// Receive and dispatch packets until the socket fails.
    ///
    /// Each datagram is handled on its own task, so events may reach the
    /// translator concurrently.
    pub async fn serve(self, translator: Arc<Translator>) -> Result<()> {
        info!("Serving OSC on {}", self.local_addr()?);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (size, peer) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("Failed to receive OSC datagram")?;

            let packet = match rosc::decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => packet,
                Err(e) => {
                    warn!("Dropping undecodable OSC packet from {}: {:?}", peer, e);
                    continue;
                }
            };

            let translator = translator.clone();
            tokio::spawn(async move {
                dispatch(&translator, packet);
            });
        }
    }
}

/// Run every message in a packet through the translator
pub fn dispatch(translator: &Translator, packet: OscPacket) {
    for message in flatten(packet) {
        let args = numeric_args(&message.args);
        trace!("OSC {} {:?}", message.addr, message.args);

        match translator.handle(&message.addr, &args) {
            Ok(_) => {}
            Err(e @ TranslateError::NotMapped { .. }) => debug!("{}", e),
            Err(e @ TranslateError::PoolExhausted { .. }) => warn!("{}", e),
            Err(e) => error!("{:#}", anyhow::Error::new(e)),
        }
    }
}

/// Messages of a packet in order, with bundles expanded
pub fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(msg) => vec![msg],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}

/// Numeric view of OSC arguments.
///
/// Ints, longs, floats, doubles and bools become `f64`; other types are
/// skipped.
pub fn numeric_args(args: &[OscType]) -> Vec<f64> {
    args.iter()
        .filter_map(|arg| match arg {
            OscType::Float(v) => Some(f64::from(*v)),
            OscType::Double(v) => Some(*v),
            OscType::Int(v) => Some(f64::from(*v)),
            OscType::Long(v) => Some(*v as f64),
            OscType::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        })
        .collect()
}
