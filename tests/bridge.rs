//! End-to-end tests: OSC datagrams in, MIDI bytes out

use oscmidi::mapping::{self, MappingStore, PersistOnExit};
use oscmidi::midi::MidiSink;
use oscmidi::osc::OscListener;
use oscmidi::translator::Translator;
use parking_lot::Mutex;
use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MidiSink for RecordingSink {
    fn send(&self, bytes: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }
}

impl RecordingSink {
    async fn wait_for(&self, count: usize) -> Vec<Vec<u8>> {
        for _ in 0..200 {
            if self.sent.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent.lock().clone()
    }
}

async fn start_bridge(
    store: Arc<MappingStore>,
    learn: bool,
) -> (SocketAddr, Arc<RecordingSink>, Arc<Translator>) {
    let sink = Arc::new(RecordingSink::default());
    let translator = Arc::new(Translator::new(store, sink.clone(), learn));

    let listener = OscListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve(translator.clone()));

    (addr, sink, translator)
}

fn send(target: SocketAddr, packet: &OscPacket) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let data = rosc::encoder::encode(packet).unwrap();
    socket.send_to(&data, target).unwrap();
}

fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    })
}

#[tokio::test]
async fn test_osc_to_control_change() {
    let store = Arc::new(MappingStore::new(mapping::default_mapping()));
    let (addr, sink, translator) = start_bridge(store.clone(), true).await;

    send(addr, &message("/ping", vec![]));
    let sent = sink.wait_for(1).await;
    assert_eq!(sent, vec![vec![0xB0, 0, 0]]);

    send(addr, &message("/fader/1", vec![OscType::Float(1.0)]));
    let sent = sink.wait_for(2).await;
    let controller = store.resolve("/fader/1").unwrap();
    assert_eq!(sent[1], vec![0xB0, controller, 127]);
    assert_eq!(translator.stats().learned, 1);
}

#[tokio::test]
async fn test_bundle_messages_are_all_sent() {
    let mut initial = mapping::default_mapping();
    initial.insert("/a".to_string(), 10);
    initial.insert("/b".to_string(), 11);
    let store = Arc::new(MappingStore::new(initial));
    let (addr, sink, _translator) = start_bridge(store, false).await;

    let bundle = OscPacket::Bundle(OscBundle {
        timetag: OscTime::from((0, 1)),
        content: vec![
            message("/a", vec![OscType::Float(0.0)]),
            message("/b", vec![OscType::Int(1)]),
        ],
    });
    send(addr, &bundle);

    let mut sent = sink.wait_for(2).await;
    sent.sort();
    assert_eq!(sent, vec![vec![0xB0, 10, 0], vec![0xB0, 11, 127]]);
}

#[tokio::test]
async fn test_no_learn_over_network() {
    let store = Arc::new(MappingStore::new(mapping::default_mapping()));
    let (addr, sink, translator) = start_bridge(store.clone(), false).await;

    for _ in 0..3 {
        send(addr, &message("/unknown", vec![OscType::Float(0.5)]));
    }
    send(addr, &message("/ping", vec![]));
    let sent = sink.wait_for(1).await;
    for _ in 0..200 {
        if translator.stats().suppressed >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(sent, vec![vec![0xB0, 0, 0]]);
    assert_eq!(store.snapshot(), mapping::default_mapping());
    assert_eq!(translator.stats().suppressed, 3);
}

#[tokio::test]
async fn test_garbage_datagram_is_ignored() {
    let store = Arc::new(MappingStore::new(mapping::default_mapping()));
    let (addr, sink, _translator) = start_bridge(store, true).await;

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(b"not osc at all", addr).unwrap();
    send(addr, &message("/ping", vec![OscType::Double(1.0)]));

    let sent = sink.wait_for(1).await;
    assert_eq!(sent, vec![vec![0xB0, 0, 127]]);
}

#[tokio::test]
async fn test_learned_mapping_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mapping.json");

    let store = Arc::new(MappingStore::open(&path).unwrap());
    let mut guard = PersistOnExit::new(store.clone(), &path);
    let (addr, sink, _translator) = start_bridge(store.clone(), true).await;

    send(addr, &message("/xy/x", vec![OscType::Float(0.5)]));
    sink.wait_for(1).await;
    let learned = store.resolve("/xy/x").unwrap();
    guard.finish().unwrap();

    let reopened = MappingStore::open(&path).unwrap();
    assert_eq!(reopened.resolve("/xy/x"), Some(learned));
    assert_eq!(reopened.resolve("/ping"), Some(0));
    assert_eq!(reopened.free(), 125);
}
