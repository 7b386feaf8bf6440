//! Client against a scripted server on a loopback socket

use botwire_core::{Direction, Phase, WireError};
use botwire_network::cipher::{cipher_pair, DecryptingReader, EncryptingWriter};
use botwire_network::framing::{read_frame, write_frame};
use botwire_network::{Client, ClientConfig, DisconnectEvent, DisconnectReason, Joined};
use botwire_protocol::packets::*;
use botwire_protocol::version::{V1_20_2, V1_8};
use botwire_protocol::{Buffer, CompressionState, Flow, PacketContainer, Protocol};
use parking_lot::Mutex;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::any::{Any, TypeId};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Server half of a connection, built from the same packet table
struct FakeServer {
    protocol: Arc<Protocol>,
    reader: DecryptingReader<TcpStream>,
    writer: EncryptingWriter<TcpStream>,
    compression: Mutex<CompressionState>,
    phase: Phase,
}

impl FakeServer {
    fn accept(listener: &TcpListener, protocol: Arc<Protocol>) -> Self {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        Self {
            protocol,
            reader: DecryptingReader::new(stream.try_clone().unwrap()),
            writer: EncryptingWriter::new(stream),
            compression: Mutex::new(CompressionState::default()),
            phase: Phase::HANDSHAKE,
        }
    }

    fn send<P: Any + Send + Sync>(&mut self, payload: P) {
        let mapping = self
            .protocol
            .by_type(self.phase, TypeId::of::<P>(), Direction::Clientbound)
            .unwrap();
        let mut body = Buffer::allocate(64);
        body.write_var_int(mapping.network_id()).unwrap();
        mapping.encode(&payload, &mut body).unwrap();
        self.send_body(body.readable_bytes());
    }

    fn send_raw(&mut self, network_id: i32, payload: &[u8]) {
        let mut body = Buffer::allocate(64);
        body.write_var_int(network_id).unwrap();
        body.write_bytes(payload).unwrap();
        self.send_body(body.readable_bytes());
    }

    fn send_body(&mut self, body: &[u8]) {
        let mut scratch = Vec::new();
        write_frame(&mut self.writer, body, &mut self.compression.lock(), &mut scratch).unwrap();
        self.writer.flush().unwrap();
    }

    fn recv_body(&mut self) -> Buffer {
        let mut body = Buffer::allocate(64);
        let mut scratch = Vec::new();
        read_frame(&mut self.reader, &self.compression, 1 << 21, &mut body, &mut scratch)
            .unwrap()
            .expect("client closed the stream");
        body
    }

    fn recv<P: Any>(&mut self) -> P {
        let mut body = self.recv_body();
        let id = body.read_var_int().unwrap();
        let mapping = self.protocol.lookup(self.phase, Direction::Serverbound, id).unwrap();
        *mapping.decode(&mut body).unwrap().downcast::<P>().unwrap()
    }

    fn set_threshold(&mut self, threshold: i32) {
        self.compression.lock().set_threshold(threshold);
    }
}

fn config(listener: &TcpListener) -> ClientConfig {
    ClientConfig {
        address: listener.local_addr().unwrap().to_string(),
        read_timeout_ms: 10_000,
        ..Default::default()
    }
}

#[test]
fn test_handshake_golden_frame() {
    let protocol = Protocol::assemble(&V1_8).unwrap();
    let mapping = protocol
        .by_type(Phase::HANDSHAKE, TypeId::of::<Handshake>(), Direction::Serverbound)
        .unwrap();
    let mut body = Buffer::allocate(32);
    body.write_var_int(mapping.network_id()).unwrap();
    mapping
        .encode(&Handshake::new(47, "localhost", 25565, Intent::Login), &mut body)
        .unwrap();

    let mut wire = Vec::new();
    write_frame(&mut wire, body.readable_bytes(), &mut CompressionState::default(), &mut Vec::new()).unwrap();

    let mut expected = vec![0x0F, 0x00, 0x2F, 0x09];
    expected.extend_from_slice(b"localhost");
    expected.extend_from_slice(&[0x63, 0xDD, 0x02]);
    assert_eq!(wire, expected);
}

#[test]
fn test_handshake_sent_on_login() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let protocol = Arc::new(Protocol::assemble(&V1_8).unwrap());

    let client = Client::connect(config(&listener), Arc::clone(&protocol)).unwrap();
    let mut server = FakeServer::accept(&listener, protocol);
    client.login("bot_01").unwrap();

    let mut body = server.recv_body();
    let mut expected = vec![0x00, 0x2F, 0x09];
    expected.extend_from_slice(b"127.0.0.1");
    expected.extend_from_slice(&port.to_be_bytes());
    expected.push(0x02);
    assert_eq!(body.readable_bytes(), &expected[..]);
    body.free();

    server.phase = Phase::LOGIN;
    let start: LoginStart = server.recv();
    assert_eq!(start.username, "bot_01");
    assert_eq!(client.connection().phase(), Phase::LOGIN);
}

#[test]
fn test_legacy_login_with_encryption_and_compression() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let protocol = Arc::new(Protocol::assemble(&V1_8).unwrap());
    let client = Client::connect(config(&listener), Arc::clone(&protocol)).unwrap();

    let joined = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&joined);
    client.joined().add(move |event: &mut Joined| {
        *slot.lock() = Some(event.username.clone());
        Flow::CONTINUE
    });
    let reason = Arc::new(Mutex::new(None));
    let reason_slot = Arc::clone(&reason);
    client.connection().events().disconnect.add(move |event: &mut DisconnectEvent| {
        *reason_slot.lock() = Some(event.reason.clone());
        Flow::CONTINUE
    });

    let server_protocol = Arc::clone(&protocol);
    let server = thread::spawn(move || {
        let mut server = FakeServer::accept(&listener, server_protocol);
        let handshake: Handshake = server.recv();
        assert_eq!(handshake.intent, Intent::Login);
        server.phase = Phase::LOGIN;
        let start: LoginStart = server.recv();
        assert_eq!(start.username, "legacy");

        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let der = RsaPublicKey::from(&private_key).to_public_key_der().unwrap();
        server.send(EncryptionRequest {
            server_id: String::new(),
            public_key: der.as_bytes().to_vec(),
            verify_token: vec![4, 3, 2, 1],
            should_authenticate: true,
        });
        let response: EncryptionResponse = server.recv();
        let secret = private_key.decrypt(Pkcs1v15Encrypt, &response.shared_secret).unwrap();
        let token = private_key.decrypt(Pkcs1v15Encrypt, &response.verify_token).unwrap();
        assert_eq!(token, vec![4, 3, 2, 1]);
        let (encryptor, decryptor) = cipher_pair(&secret).unwrap();
        server.writer.enable(encryptor);
        server.reader.enable(decryptor);

        server.send(SetCompression { threshold: 64 });
        server.set_threshold(64);
        server.send(LoginSuccess {
            uuid: Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef),
            username: "legacy".into(),
            properties: Vec::new(),
        });

        server.phase = Phase::PLAY;
        server.send(ClientboundKeepAlive { id: 1234 });
        let reply: ServerboundKeepAlive = server.recv();
        assert_eq!(reply.id, 1234);

        // chat long enough to cross the threshold
        let chat: ChatInput = server.recv();
        assert_eq!(chat.message.len(), 90);

        server.send(Disconnect {
            reason: r#"{"text":"bye"}"#.into(),
        });
    });

    client.login("legacy").unwrap();
    client.wait_for_play(TIMEOUT).unwrap();
    assert_eq!(joined.lock().as_deref(), Some("legacy"));
    assert!(client.connection().is_encrypted());
    assert_eq!(client.connection().compression_threshold(), Some(64));

    assert!(client.chat(&"x".repeat(90)).unwrap());
    server.join().unwrap();

    assert!(client.connection().wait_closed(TIMEOUT));
    assert_eq!(*reason.lock(), Some(DisconnectReason::Kicked("bye".into())));
    assert!(matches!(client.chat("late"), Err(WireError::Closed)));
}

#[test]
fn test_configuration_flow_and_unknown_packets() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let protocol = Arc::new(Protocol::assemble(&V1_20_2).unwrap());
    let client = Client::connect(config(&listener), Arc::clone(&protocol)).unwrap();

    let unknown = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&unknown);
    let id = client.connection().id();
    protocol.chains().received.add(move |container: &mut PacketContainer| {
        if container.session().map(|s| s.id()) == Some(id) {
            if let Some(packet) = container.unknown_packet() {
                seen.lock().push((container.phase(), packet.network_id(), packet.bytes().to_vec()));
            }
        }
        Flow::CONTINUE
    });
    let keep_alives = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&keep_alives);
    let subscription = protocol.on::<ClientboundKeepAlive, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Flow::CONTINUE
    });

    let server_protocol = Arc::clone(&protocol);
    let server = thread::spawn(move || {
        let mut server = FakeServer::accept(&listener, server_protocol);
        let _: Handshake = server.recv();
        server.phase = Phase::LOGIN;
        let start: LoginStart = server.recv();
        assert_eq!(start.username, "modern");

        server.send(SetCompression { threshold: 32 });
        server.set_threshold(32);
        server.send(LoginSuccess {
            uuid: Uuid::from_u128(7),
            username: "modern".into(),
            properties: Vec::new(),
        });
        let _: LoginAcknowledged = server.recv();

        server.phase = Phase::CONFIGURATION;
        server.send(ConfigurationPing { id: 99 });
        let pong: ConfigurationPong = server.recv();
        assert_eq!(pong.id, 99);
        server.send(ClientboundKeepAlive { id: 5 });
        let reply: ServerboundKeepAlive = server.recv();
        assert_eq!(reply.id, 5);
        server.send(FinishConfiguration);
        let _: FinishConfigurationAck = server.recv();

        server.phase = Phase::PLAY;
        // one small, one compressed, neither mapped in PLAY
        server.send_raw(0x7E, &[1, 2, 3]);
        server.send_raw(0x7D, &[0xAB; 200]);
        // five-byte id, past the largest mappable id
        server.send_raw(0x4000_0000, &[9]);
        server.send(ClientboundKeepAlive { id: -9 });
        let reply: ServerboundKeepAlive = server.recv();
        assert_eq!(reply.id, -9);
    });

    client.login("modern").unwrap();
    client.wait_for_play(TIMEOUT).unwrap();
    server.join().unwrap();

    let unknown = unknown.lock();
    assert_eq!(unknown.len(), 3);
    assert_eq!(unknown[0], (Phase::PLAY, 0x7E, vec![1, 2, 3]));
    assert_eq!(unknown[1].1, 0x7D);
    assert_eq!(unknown[1].2, vec![0xAB; 200]);
    assert_eq!(unknown[2], (Phase::PLAY, 0x4000_0000, vec![9]));
    assert_eq!(keep_alives.load(Ordering::SeqCst), 2);
    assert!(!client.connection().is_closed());

    subscription.cancel();
    client.disconnect();
}

#[test]
fn test_status_query() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let protocol = Arc::new(Protocol::assemble(&V1_20_2).unwrap());
    let client = Client::connect(config(&listener), Arc::clone(&protocol)).unwrap();

    let server_protocol = Arc::clone(&protocol);
    let server = thread::spawn(move || {
        let mut server = FakeServer::accept(&listener, server_protocol);
        let handshake: Handshake = server.recv();
        assert_eq!(handshake.intent, Intent::Status);
        assert_eq!(handshake.protocol_version, 764);

        server.phase = Phase::STATUS;
        let _: StatusRequest = server.recv();
        server.send(StatusResponse {
            json: r#"{"version":{"name":"1.20.2","protocol":764},
                      "players":{"max":20,"online":3},
                      "description":{"text":"A ","extra":[{"text":"test"}]}}"#
                .into(),
        });
        let ping: PingRequest = server.recv();
        server.send(PongResponse { payload: ping.payload });
    });

    let (status, ping) = client.status().unwrap();
    server.join().unwrap();

    assert_eq!(status.description_text(), "A test");
    assert_eq!(status.players.unwrap().online, 3);
    assert_eq!(status.version.unwrap().protocol, 764);
    assert!(ping < TIMEOUT);
    assert!(client.connection().is_closed());
}

#[test]
fn test_login_rejects_bad_username() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let protocol = Arc::new(Protocol::assemble(&V1_20_2).unwrap());
    let client = Client::connect(config(&listener), protocol).unwrap();
    assert!(matches!(client.login("name_that_is_too_long"), Err(WireError::Config(_))));
    assert!(matches!(client.chat("hi"), Err(WireError::UnmappedPayload { .. })));
}

#[test]
fn test_send_encode_failure_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let protocol = Arc::new(Protocol::assemble(&V1_20_2).unwrap());
    let client = Client::connect(config(&listener), protocol).unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    client.connection().events().error.add(move |error: &mut WireError| {
        if let WireError::Send { packet, .. } = error {
            sink.lock().push(packet.clone());
        }
        Flow::CONTINUE
    });

    client.connection().set_phase(Phase::LOGIN);
    let result = client.send(LoginStart::new("x".repeat(MAX_USERNAME_LEN + 1)));
    assert!(matches!(result, Err(WireError::Send { .. })));
    assert_eq!(*errors.lock(), vec!["ServerboundLoginStart".to_string()]);
    assert!(!client.connection().is_closed());
}
