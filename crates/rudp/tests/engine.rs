use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rudp::{
    CODE_SESSION_EXISTS, DataMsg, DatagramReceiver, DatagramSink, Engine, EngineConfig,
    EngineEvent, Envelope, EventQueue, Framer, MessageKind, RegisterMsg, RegisterRsMsg,
    RetryBudget, SessionCode, TransportError,
};

/// Captures outbound datagrams so tests decide what reaches the other side.
#[derive(Default)]
struct Wire {
    datagrams: Mutex<Vec<Vec<u8>>>,
}

impl Wire {
    fn take(&self) -> Vec<Vec<u8>> {
        self.datagrams.lock().unwrap().drain(..).collect()
    }
}

impl DatagramSink for Wire {
    fn send_datagram(&self, data: Vec<u8>, _dest: SocketAddr) {
        self.datagrams.lock().unwrap().push(data);
    }

    fn send_immediate(&self, data: &[u8], _dest: SocketAddr) {
        self.datagrams.lock().unwrap().push(data.to_vec());
    }
}

struct Peer {
    addr: SocketAddr,
    engine: Arc<Engine>,
    wire: Arc<Wire>,
    events: Arc<EventQueue>,
}

impl Peer {
    fn new(port: u16) -> Self {
        let wire = Arc::new(Wire::default());
        let events = Arc::new(EventQueue::new());
        let engine = Engine::new(EngineConfig::default(), wire.clone(), events.clone());
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            engine,
            wire,
            events,
        }
    }

    /// Delivers everything this peer sent to `to`, returning the count.
    fn pump(&self, to: &Peer) -> usize {
        self.pump_filtered(to, |_| true)
    }

    fn pump_filtered(&self, to: &Peer, mut keep: impl FnMut(usize) -> bool) -> usize {
        let mut delivered = 0;
        for (index, datagram) in self.wire.take().into_iter().enumerate() {
            if keep(index) {
                to.engine.on_datagram(&datagram, self.addr);
                delivered += 1;
            }
        }
        delivered
    }

    fn received(&self) -> Vec<Vec<u8>> {
        self.events
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Received { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }
}

fn kinds(datagrams: &[Vec<u8>]) -> Vec<MessageKind> {
    let framer = Framer::default();
    datagrams
        .iter()
        .map(|datagram| Envelope::decode(framer.unwrap(datagram)).unwrap().0)
        .collect()
}

/// Runs a full handshake from `client` to `server` and returns the sid.
fn connect(client: &Peer, server: &Peer) -> i64 {
    let sid = client.engine.create_session(server.addr).unwrap();
    client.pump(server);
    server.pump(client);
    client.pump(server);
    client.events.drain();
    server.events.drain();
    sid
}

#[test]
fn test_handshake_end_to_end() {
    let client = Peer::new(9001);
    let server = Peer::new(9002);

    let sid = client.engine.create_session(server.addr).unwrap();
    assert_eq!(kinds(&client.wire.datagrams.lock().unwrap()), vec![MessageKind::Register]);
    assert_eq!(client.pump(&server), 1);
    assert_eq!(server.engine.session_count(), 1);

    let server_events = server.events.drain();
    assert!(matches!(
        &server_events[..],
        [EngineEvent::SessionAccepted { sid: s, peer }] if *s == sid && *peer == client.addr
    ));

    let replies = server.wire.take();
    assert_eq!(kinds(&replies), vec![MessageKind::Ack, MessageKind::RegisterRs]);
    for datagram in &replies {
        client.engine.on_datagram(datagram, server.addr);
    }

    let client_events = client.events.drain();
    assert!(matches!(
        &client_events[..],
        [EngineEvent::SessionCreated { sid: s, code: SessionCode::Ok }] if *s == sid
    ));

    let client_session = client.engine.session(sid).unwrap();
    assert!(client_session.is_established());
    assert!(client_session.send_buffer().is_empty());

    assert_eq!(client.pump(&server), 1);
    assert!(server.engine.session(sid).unwrap().send_buffer().is_empty());
}

#[test]
fn test_register_rs_notifies_once() {
    let client = Peer::new(9011);
    let server = Peer::new(9012);

    let sid = client.engine.create_session(server.addr).unwrap();
    client.pump(&server);

    let replies = server.wire.take();
    for datagram in replies.iter().chain(replies.iter()) {
        client.engine.on_datagram(datagram, server.addr);
    }

    let created = client
        .events
        .drain()
        .into_iter()
        .filter(|event| matches!(event, EngineEvent::SessionCreated { sid: s, .. } if *s == sid))
        .count();
    assert_eq!(created, 1);

    // Each REG_RS copy is still acknowledged.
    let acks = kinds(&client.wire.take())
        .into_iter()
        .filter(|kind| *kind == MessageKind::Ack)
        .count();
    assert_eq!(acks, 2);
}

#[test]
fn test_duplicate_register_is_refused() {
    let client = Peer::new(9021);
    let server = Peer::new(9022);
    let sid = connect(&client, &server);

    let duplicate = RegisterMsg { seq: 0, sid }.to_envelope().unwrap();
    let result = server
        .engine
        .receive_datagram(&Framer::default().wrap(&duplicate), client.addr);
    assert!(matches!(result, Err(TransportError::SessionExists { sid: s }) if s == sid));
    assert_eq!(server.engine.session_count(), 1);

    let refusal = server.wire.take();
    assert_eq!(refusal.len(), 1);
    let (kind, payload) = Envelope::decode(Framer::default().unwrap(&refusal[0])).unwrap();
    assert_eq!(kind, MessageKind::RegisterRs);
    assert_eq!(
        RegisterRsMsg::deserialize(&payload).unwrap().code,
        CODE_SESSION_EXISTS
    );

    // An established initiator ignores the late refusal and never ACKs it.
    client.engine.on_datagram(&refusal[0], server.addr);
    assert!(client.engine.session(sid).is_some());
    assert!(client.events.is_empty());
    assert!(client.wire.take().is_empty());
}

#[test]
fn test_refusal_does_not_acknowledge_pending_register_rs() {
    let client = Peer::new(9023);
    let server = Peer::new(9024);

    let sid = client.engine.create_session(server.addr).unwrap();
    client.pump(&server);
    server.events.drain();

    // The ACK for REG and the REG_RS are both lost.
    assert_eq!(server.pump_filtered(&client, |_| false), 0);
    let server_session = server.engine.session(sid).unwrap();
    assert_eq!(server_session.send_buffer().len(), 1);

    client
        .engine
        .retransmission_sweep_at(Instant::now() + Duration::from_secs(1));
    assert_eq!(client.pump(&server), 1);
    assert_eq!(kinds(&server.wire.datagrams.lock().unwrap()), vec![MessageKind::RegisterRs]);
    server.pump(&client);

    let events = client.events.drain();
    assert!(matches!(
        &events[..],
        [EngineEvent::SessionCreated { sid: s, code: SessionCode::Error }] if *s == sid
    ));
    assert!(client.wire.take().is_empty());

    // The accepted REG_RS is still waiting for its own ACK.
    assert_eq!(server_session.send_buffer().len(), 1);

    server
        .engine
        .set_max_retransmissions(sid, RetryBudget::Limited(1))
        .unwrap();
    let start = Instant::now();
    server
        .engine
        .retransmission_sweep_at(start + Duration::from_secs(1));
    server
        .engine
        .retransmission_sweep_at(start + Duration::from_secs(2));

    let events = server.events.drain();
    assert!(matches!(
        &events[..],
        [EngineEvent::SessionError {
            error: TransportError::DeliveryGiveUp { sid: s, .. },
            ..
        }] if *s == sid
    ));
}

#[test]
fn test_rejected_handshake_removes_session() {
    let client = Peer::new(9031);
    let server = Peer::new(9032);

    let sid = client.engine.create_session(server.addr).unwrap();
    client.wire.take();

    let refusal = RegisterRsMsg {
        seq: 0,
        sid,
        code: CODE_SESSION_EXISTS,
    }
    .to_envelope()
    .unwrap();
    let result = client
        .engine
        .receive_datagram(&Framer::default().wrap(&refusal), server.addr);

    assert!(matches!(
        result,
        Err(TransportError::Rejected { code: CODE_SESSION_EXISTS, .. })
    ));
    assert!(client.engine.session(sid).is_none());

    let events = client.events.drain();
    assert!(matches!(
        &events[..],
        [EngineEvent::SessionCreated { sid: s, code: SessionCode::Error }] if *s == sid
    ));
}

#[test]
fn test_data_delivered_in_order_after_loss() {
    let client = Peer::new(9041);
    let server = Peer::new(9042);
    let sid = connect(&client, &server);

    for payload in [b"one", b"two", b"tri"] {
        client.engine.send_data(sid, payload).unwrap();
    }

    // The second DATA is lost on the way.
    assert_eq!(client.pump_filtered(&server, |index| index != 1), 2);
    assert_eq!(server.engine.drain_deliveries(), 1);
    assert_eq!(server.received(), vec![b"one".to_vec()]);

    server.pump(&client);
    assert_eq!(client.engine.session(sid).unwrap().send_buffer().len(), 1);

    client
        .engine
        .retransmission_sweep_at(Instant::now() + Duration::from_secs(1));
    assert_eq!(client.pump(&server), 1);

    assert_eq!(server.engine.drain_deliveries(), 2);
    assert_eq!(server.received(), vec![b"two".to_vec(), b"tri".to_vec()]);

    server.pump(&client);
    let stats = client.engine.session(sid).unwrap().stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.retransmitted, 1);
}

#[test]
fn test_out_of_range_data_is_dropped() {
    let client = Peer::new(9043);
    let server = Peer::new(9044);
    let sid = connect(&client, &server);

    for seq in [i64::MAX, -3] {
        let data = DataMsg {
            seq,
            sid,
            data: b"bogus".to_vec(),
        }
        .to_envelope()
        .unwrap();
        let result = server
            .engine
            .receive_datagram(&Framer::default().wrap(&data), client.addr);
        assert!(matches!(
            result,
            Err(TransportError::SequenceOutOfRange { sid: s, seq: q, kind: MessageKind::Data })
                if s == sid && q == seq
        ));
    }

    assert!(server.wire.take().is_empty());
    let session = server.engine.session(sid).unwrap();
    assert!(session.recv_buffer().is_empty());

    let later = Instant::now() + Duration::from_secs(10);
    assert_eq!(server.engine.timeout_sweep_at(later), 0);

    client.engine.send_data(sid, b"real").unwrap();
    client.pump(&server);
    assert_eq!(server.engine.drain_deliveries(), 1);
    assert_eq!(server.received(), vec![b"real".to_vec()]);
}

#[test]
fn test_duplicate_data_is_acked_not_redelivered() {
    let client = Peer::new(9051);
    let server = Peer::new(9052);
    let sid = connect(&client, &server);

    client.engine.send_data(sid, b"once").unwrap();
    let sent = client.wire.take();
    for datagram in sent.iter().chain(sent.iter()) {
        server.engine.on_datagram(datagram, client.addr);
    }

    assert_eq!(kinds(&server.wire.take()), vec![MessageKind::Ack, MessageKind::Ack]);
    server.engine.drain_deliveries();
    assert_eq!(server.received(), vec![b"once".to_vec()]);
}

#[test]
fn test_gap_timeout_skips_missing_data() {
    let client = Peer::new(9061);
    let server = Peer::new(9062);
    let sid = connect(&client, &server);

    for payload in [b"lost", b"late", b"last"] {
        client.engine.send_data(sid, payload).unwrap();
    }
    client.pump_filtered(&server, |index| index != 0);

    assert_eq!(server.engine.drain_deliveries(), 0);
    assert_eq!(server.engine.timeout_sweep_at(Instant::now()), 0);

    let later = Instant::now() + Duration::from_secs(4);
    assert_eq!(server.engine.timeout_sweep_at(later), 2);
    assert_eq!(server.received(), vec![b"late".to_vec(), b"last".to_vec()]);

    // The skipped sequence is now stale and never delivered.
    client
        .engine
        .retransmission_sweep_at(Instant::now() + Duration::from_secs(1));
    client.pump(&server);
    server.engine.drain_deliveries();
    assert!(server.received().is_empty());
}

#[test]
fn test_give_up_reaches_handler() {
    let client = Peer::new(9071);
    let server = Peer::new(9072);
    let sid = connect(&client, &server);

    client
        .engine
        .set_max_retransmissions(sid, RetryBudget::Limited(2))
        .unwrap();
    let seq = client.engine.send_data(sid, b"void").unwrap();
    client.wire.take();

    let start = Instant::now();
    for second in 1..=3 {
        client
            .engine
            .retransmission_sweep_at(start + Duration::from_secs(second));
    }

    assert_eq!(client.wire.take().len(), 2);
    let events = client.events.drain();
    assert!(matches!(
        &events[..],
        [EngineEvent::SessionError {
            error: TransportError::DeliveryGiveUp { sid: s, seq: q },
            ..
        }] if *s == sid && *q == seq
    ));
    assert_eq!(client.engine.session(sid).unwrap().stats().abandoned, 1);
}

#[test]
fn test_disabled_retransmission_keeps_entry() {
    let client = Peer::new(9081);
    let server = Peer::new(9082);
    let sid = connect(&client, &server);

    client
        .engine
        .set_max_retransmissions(sid, RetryBudget::Disabled)
        .unwrap();
    client.engine.send_data(sid, b"once").unwrap();
    client.wire.take();

    client
        .engine
        .retransmission_sweep_at(Instant::now() + Duration::from_secs(5));
    assert!(client.wire.take().is_empty());
    assert_eq!(client.engine.session(sid).unwrap().send_buffer().len(), 1);
}

#[test]
fn test_stray_traffic_is_dropped() {
    let server = Peer::new(9092);
    let source = SocketAddr::from(([127, 0, 0, 1], 9091));

    server.engine.on_datagram(b"not a frame", source);
    server.engine.on_datagram(&Framer::default().wrap(&[0xff; 8]), source);

    assert_eq!(server.engine.session_count(), 0);
    assert!(server.wire.take().is_empty());
    assert!(server.events.is_empty());
}

#[test]
fn test_close_session_stops_traffic() {
    let client = Peer::new(9101);
    let server = Peer::new(9102);
    let sid = connect(&client, &server);

    assert!(client.engine.close_session(sid).is_some());
    assert!(matches!(
        client.engine.send_data(sid, b"x"),
        Err(TransportError::UnknownSession { .. })
    ));

    server.engine.send_data(sid, b"orphan").unwrap();
    server.pump(&client);
    assert!(client.wire.take().is_empty());
}

#[test]
fn test_stats_cover_all_sessions() {
    let client = Peer::new(9111);
    let server = Peer::new(9112);
    let first = connect(&client, &server);
    let second = connect(&client, &server);

    client.engine.send_data(first, b"a").unwrap();
    client.pump(&server);
    server.pump(&client);

    let stats = client.engine.stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].sid, first);
    assert_eq!(stats[1].sid, second);
    assert_eq!(stats[0].sent, 2);
    assert_eq!(stats[0].acked, 2);
    assert_eq!(stats[0].loss_rate(), 0.0);
}
