//! End-to-end gateway tests: real TCP connections, real identity claims,
//! real redb-backed catalog.

use std::time::Duration;

use auction_server::auth::{JwtConfig, JwtService};
use auction_server::core::{Config, ServerState};
use auction_server::gateway::{ConnectionGateway, GatewayConfig, TcpTransport, Transport};
use shared::message::{BusMessage, EventType, PROTOCOL_VERSION};
use shared::payload::{
    AuctionCommand, CommandEnvelope, CommandErrorCode, CommandResponse, HandshakeAck,
    HandshakePayload, SnapshotPayload,
};
use shared::{Phase, Role};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const BASE: u64 = 20_000_000;

const SEED: &str = r#"{
    "lots": [
        {"id": "p1", "name": "A. Opener", "category": "BATTER", "nationality": "IN",
         "age": 29, "base_price": 20000000, "points": 80},
        {"id": "p2", "name": "B. Quick", "category": "BOWLER", "nationality": "AU",
         "age": 24, "base_price": 10000000, "points": 60}
    ],
    "teams": [
        {"id": "t1", "name": "Alpha", "short_name": "ALP"},
        {"id": "t2", "name": "Beta", "short_name": "BET"}
    ]
}"#;

fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "integration-test-secret-key-0123456789abcdef".to_string(),
        expiration_minutes: 60,
        issuer: "auction-server".to_string(),
        audience: "auction-clients".to_string(),
    }
}

struct TestServer {
    _work_dir: tempfile::TempDir,
    addr: String,
    jwt: JwtService,
    state: ServerState,
    gateway: ConnectionGateway,
}

async fn start_server() -> TestServer {
    let work_dir = tempfile::tempdir().unwrap();
    let seed_path = work_dir.path().join("catalog.json");
    std::fs::write(&seed_path, SEED).unwrap();

    let port = 20000 + (rand::random::<u16>() % 20000);
    let mut config = Config::with_overrides(work_dir.path().to_str().unwrap(), port);
    config.environment = "development".to_string();
    config.catalog_seed = Some(seed_path.to_str().unwrap().to_string());
    config.jwt = test_jwt_config();

    let state = ServerState::initialize(&config).await.unwrap();

    let addr = format!("127.0.0.1:{}", port);
    let gateway = ConnectionGateway::new(
        GatewayConfig {
            listen_addr: addr.clone(),
            tls: None,
        },
        state.engine.clone(),
        state.hub.clone(),
        state.get_jwt_service(),
    );

    let running = gateway.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });

    // Wait for the listener to come up.
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(&addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    TestServer {
        _work_dir: work_dir,
        addr,
        jwt: JwtService::with_config(test_jwt_config()),
        state,
        gateway,
    }
}

/// A connected, authenticated client speaking the frame protocol.
struct TestClient {
    transport: TcpTransport,
    /// Newest snapshot observed while waiting for other frames.
    last_snapshot: Option<SnapshotPayload>,
}

impl TestClient {
    async fn connect(addr: &str, token: &str) -> (Self, HandshakeAck) {
        let transport = TcpTransport::connect(addr).await.unwrap();
        let handshake = BusMessage::handshake(&HandshakePayload {
            version: PROTOCOL_VERSION,
            token: token.to_string(),
            client_name: Some("test-client".to_string()),
        });
        transport.write_message(&handshake).await.unwrap();

        let mut client = Self {
            transport,
            last_snapshot: None,
        };
        let ack_msg = client.recv().await;
        assert_eq!(ack_msg.event_type, EventType::Response);
        let ack: HandshakeAck = ack_msg.parse_payload().unwrap();
        (client, ack)
    }

    async fn recv(&mut self) -> BusMessage {
        timeout(RECV_TIMEOUT, self.transport.read_message())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
    }

    /// Read frames until the next snapshot arrives.
    async fn next_snapshot(&mut self) -> SnapshotPayload {
        loop {
            let msg = self.recv().await;
            if msg.event_type == EventType::Snapshot {
                let snapshot: SnapshotPayload = msg.parse_payload().unwrap();
                self.last_snapshot = Some(snapshot.clone());
                return snapshot;
            }
        }
    }

    /// Read until a snapshot with at least the given version is seen,
    /// discarding stale ones — the same rule real clients apply.
    async fn snapshot_at_least(&mut self, version: u64) -> SnapshotPayload {
        if let Some(snapshot) = &self.last_snapshot
            && snapshot.version >= version
        {
            return snapshot.clone();
        }
        loop {
            let snapshot = self.next_snapshot().await;
            if snapshot.version >= version {
                return snapshot;
            }
        }
    }

    /// Send a command and read frames until its reply arrives; snapshots
    /// seen along the way are stashed.
    async fn send_command(&mut self, command: AuctionCommand) -> CommandResponse {
        let envelope = CommandEnvelope {
            command_id: uuid::Uuid::new_v4().to_string(),
            command,
        };
        let msg = BusMessage::command(&envelope);
        let request_id = msg.request_id;
        self.transport.write_message(&msg).await.unwrap();

        loop {
            let frame = self.recv().await;
            match frame.event_type {
                EventType::Response if frame.correlation_id == Some(request_id) => {
                    return frame.parse_payload().unwrap();
                }
                EventType::Snapshot => {
                    self.last_snapshot = Some(frame.parse_payload().unwrap());
                }
                _ => {}
            }
        }
    }
}

fn operator_token(jwt: &JwtService) -> String {
    jwt.generate_token("op-1", "Operator", Role::Operator, None)
        .unwrap()
}

fn rep_token(jwt: &JwtService, team: &str) -> String {
    jwt.generate_token(&format!("rep-{}", team), team, Role::TeamRep, Some(team))
        .unwrap()
}

#[tokio::test]
async fn test_full_auction_flow() {
    let server = start_server().await;

    let (mut operator, ack) =
        TestClient::connect(&server.addr, &operator_token(&server.jwt)).await;
    assert!(ack.success);

    // Immediately after the handshake comes the boot snapshot.
    let boot = operator.next_snapshot().await;
    assert_eq!(boot.version, 0);
    assert_eq!(boot.phase, Phase::Idle);
    assert_eq!(boot.teams.len(), 2);

    let (mut rep1, _) = TestClient::connect(&server.addr, &rep_token(&server.jwt, "t1")).await;
    let (mut rep2, _) = TestClient::connect(&server.addr, &rep_token(&server.jwt, "t2")).await;
    rep1.next_snapshot().await;
    rep2.next_snapshot().await;

    // Operator opens the block.
    let started = operator.send_command(AuctionCommand::Start).await;
    assert!(started.success);
    assert_eq!(started.version, Some(1));

    let snap = rep1.snapshot_at_least(1).await;
    assert_eq!(snap.phase, Phase::LotActive);
    assert_eq!(snap.current_lot.as_ref().unwrap().id, "p1");
    assert_eq!(snap.current_bid, BASE);

    // t1 takes the floor at the opening price.
    let bid = rep1
        .send_command(AuctionCommand::PlaceBid {
            amount: BASE,
            team_id: None,
        })
        .await;
    assert!(bid.success);

    // The same amount from t2 is now below the floor.
    let losing = rep2
        .send_command(AuctionCommand::PlaceBid {
            amount: BASE,
            team_id: None,
        })
        .await;
    assert!(!losing.success);
    assert_eq!(losing.error.unwrap().code, CommandErrorCode::BidTooLow);

    // t2 raises properly.
    let raised = BASE + 2_000_000;
    let winning = rep2
        .send_command(AuctionCommand::PlaceBid {
            amount: raised,
            team_id: None,
        })
        .await;
    assert!(winning.success);

    let snap = operator.snapshot_at_least(winning.version.unwrap()).await;
    assert_eq!(snap.leading_team.as_ref().unwrap().id, "t2");
    assert_eq!(snap.current_bid, raised);

    // Hammer down; everyone sees the debit and the next lot.
    let sold = operator.send_command(AuctionCommand::MarkSold).await;
    assert!(sold.success);

    let snap = rep2.snapshot_at_least(sold.version.unwrap()).await;
    assert_eq!(snap.phase, Phase::LotActive);
    assert_eq!(snap.current_lot.as_ref().unwrap().id, "p2");
    let t2 = snap.teams.iter().find(|t| t.id == "t2").unwrap();
    assert_eq!(t2.purse, 1_200_000_000 - raised);
    assert_eq!(t2.roster_size, 1);

    // The sale is durable.
    let outcome = server.state.store.outcome("p1").unwrap().unwrap();
    assert_eq!(outcome.team_id.as_deref(), Some("t2"));
    assert_eq!(outcome.final_price, Some(raised));

    server.gateway.shutdown();
    server.state.shutdown();
}

#[tokio::test]
async fn test_invalid_claims_are_refused() {
    let server = start_server().await;

    // Garbage token.
    let (_client, ack) = TestClient::connect(&server.addr, "not-a-jwt").await;
    assert!(!ack.success);
    assert_eq!(
        ack.error.unwrap().code,
        CommandErrorCode::Unauthenticated
    );

    // Expired token, properly signed.
    let expired_issuer = JwtService::with_config(JwtConfig {
        expiration_minutes: -5,
        ..test_jwt_config()
    });
    let token = expired_issuer
        .generate_token("late", "Late", Role::Presenter, None)
        .unwrap();
    let (_client, ack) = TestClient::connect(&server.addr, &token).await;
    assert!(!ack.success);

    server.gateway.shutdown();
    server.state.shutdown();
}

#[tokio::test]
async fn test_reconnect_receives_current_snapshot() {
    let server = start_server().await;

    let (mut operator, _) =
        TestClient::connect(&server.addr, &operator_token(&server.jwt)).await;
    operator.next_snapshot().await;
    assert!(operator.send_command(AuctionCommand::Start).await.success);
    assert!(
        operator
            .send_command(AuctionCommand::PlaceBid {
                amount: BASE,
                team_id: Some("t1".to_string()),
            })
            .await
            .success
    );

    // A fresh connection gets the current state without any replay.
    let (mut late, ack) = TestClient::connect(&server.addr, &rep_token(&server.jwt, "t2")).await;
    assert!(ack.success);
    let snap = late.next_snapshot().await;
    assert_eq!(snap.version, 2);
    assert_eq!(snap.phase, Phase::LotActive);
    assert_eq!(snap.leading_team.as_ref().unwrap().id, "t1");
    assert_eq!(snap.current_bid, BASE);

    server.gateway.shutdown();
    server.state.shutdown();
}

#[tokio::test]
async fn test_role_enforcement_over_the_wire() {
    let server = start_server().await;

    let (mut rep, _) = TestClient::connect(&server.addr, &rep_token(&server.jwt, "t1")).await;
    rep.next_snapshot().await;

    // A rep cannot drive the auction...
    let refused = rep.send_command(AuctionCommand::Start).await;
    assert!(!refused.success);
    assert_eq!(
        refused.error.unwrap().code,
        CommandErrorCode::Unauthorized
    );

    // ...nor reset it.
    let refused = rep.send_command(AuctionCommand::Reset).await;
    assert_eq!(
        refused.error.unwrap().code,
        CommandErrorCode::Unauthorized
    );

    // And it cannot bid for the other team by forging the payload.
    let (mut operator, _) =
        TestClient::connect(&server.addr, &operator_token(&server.jwt)).await;
    operator.next_snapshot().await;
    assert!(operator.send_command(AuctionCommand::Start).await.success);

    let forged = rep
        .send_command(AuctionCommand::PlaceBid {
            amount: BASE,
            team_id: Some("t2".to_string()),
        })
        .await;
    assert!(!forged.success);
    assert_eq!(
        forged.error.unwrap().code,
        CommandErrorCode::Unauthorized
    );

    server.gateway.shutdown();
    server.state.shutdown();
}

#[tokio::test]
async fn test_disconnect_leaves_session_untouched() {
    let server = start_server().await;

    let (mut operator, _) =
        TestClient::connect(&server.addr, &operator_token(&server.jwt)).await;
    operator.next_snapshot().await;
    assert!(operator.send_command(AuctionCommand::Start).await.success);

    // A bidder connects, bids, and vanishes.
    {
        let (mut rep, _) = TestClient::connect(&server.addr, &rep_token(&server.jwt, "t1")).await;
        rep.next_snapshot().await;
        assert!(
            rep.send_command(AuctionCommand::PlaceBid {
                amount: BASE,
                team_id: None,
            })
            .await
            .success
        );
        rep.transport.close().await.unwrap();
    }

    // Its accepted bid still stands.
    let snap = server.state.hub.latest();
    assert_eq!(snap.leading_team.as_ref().unwrap().id, "t1");
    assert_eq!(snap.current_bid, BASE);

    server.gateway.shutdown();
    server.state.shutdown();
}
