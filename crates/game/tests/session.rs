use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use duel::lobby::{COUNTDOWN_DURATION, MSG_CHECKING, MSG_NOT_RESPONDING};
use duel::snapshot::{MATCH_DURATION, RESPAWN_DELAY};
use duel::sync;
use duel::{
    Address, Endpoint, EndpointConfig, GameStatus, GameWorld, HOST_SLOT, HostCommand, HostSync,
    InputAction, JOINER_SLOT, LobbyConfig, LobbyEvent, LobbySession, LobbyState, Message,
    PlayerInput, Relay, RelayConfig, Replica, Role, SessionCode, SessionRegistry, SyncConfig,
};
use glam::Vec2;

fn relay_config() -> RelayConfig {
    RelayConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        advertise: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        prefer_default_port: false,
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn endpoint_config() -> EndpointConfig {
    EndpointConfig {
        handshake_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
        keepalive_tick: Duration::from_millis(50),
        ..Default::default()
    }
}

fn lobby_config(registry: &Arc<SessionRegistry>, countdown: Duration) -> LobbyConfig {
    LobbyConfig {
        countdown,
        ready_window: Duration::from_secs(1),
        relay: relay_config(),
        endpoint: endpoint_config(),
        registry: Some(Arc::clone(registry)),
    }
}

#[derive(Default)]
struct Recorded {
    host: Vec<LobbyEvent>,
    joiner: Vec<LobbyEvent>,
}

fn pump_until(
    host: &mut LobbySession,
    joiner: &mut LobbySession,
    recorded: &mut Recorded,
    timeout: Duration,
    done: impl Fn(&LobbySession, &LobbySession) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        let now = Instant::now();
        recorded.host.extend(host.update(now));
        recorded.joiner.extend(joiner.update(now));
        if done(host, joiner) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// The relay forgets a silent participant within a few hundred
/// milliseconds; live endpoints ping often enough to stay.
fn short_liveness(registry: &Arc<SessionRegistry>, countdown: Duration) -> LobbyConfig {
    let config = lobby_config(registry, countdown);
    LobbyConfig {
        relay: RelayConfig {
            liveness: Duration::from_millis(300),
            sweep_interval: Duration::from_millis(50),
            ..config.relay
        },
        endpoint: EndpointConfig {
            ping_interval: Duration::from_millis(50),
            keepalive_tick: Duration::from_millis(20),
            ..config.endpoint
        },
        ..config
    }
}

/// Hosts, joins by code and waits until both sides are in the waiting room.
fn connected_pair(countdown: Duration, recorded: &mut Recorded) -> (LobbySession, LobbySession) {
    let registry = Arc::new(SessionRegistry::in_memory());
    connected_pair_with(
        lobby_config(&registry, countdown),
        lobby_config(&registry, countdown),
        recorded,
    )
}

fn connected_pair_with(
    host_config: LobbyConfig,
    joiner_config: LobbyConfig,
    recorded: &mut Recorded,
) -> (LobbySession, LobbySession) {
    let mut host = LobbySession::new(host_config);
    let mut joiner = LobbySession::new(joiner_config);

    host.host();
    assert_eq!(host.state(), LobbyState::HostWaiting, "{:?}", host.error());
    let code = host.code().unwrap();
    assert!(code.is_loopback());

    joiner.begin_join();
    joiner.submit_code(&code.as_str().to_lowercase());
    assert_eq!(joiner.state(), LobbyState::Connecting);

    assert!(pump_until(
        &mut host,
        &mut joiner,
        recorded,
        Duration::from_secs(3),
        |h, j| j.state() == LobbyState::ClientWaiting && h.participant_count() == 2,
    ));
    (host, joiner)
}

#[test]
fn test_lobby_to_playing() {
    let mut recorded = Recorded::default();
    let countdown = Duration::from_millis(500);
    let (mut host, mut joiner) = connected_pair(countdown, &mut recorded);

    assert_eq!(host.player_id(), Some(0));
    assert_eq!(joiner.player_id(), Some(1));
    assert_eq!(joiner.role(), Some(Role::Joiner));

    host.start_ready_check(Instant::now());
    assert_eq!(host.error(), Some(MSG_CHECKING));

    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(1),
        |h, j| h.state() == LobbyState::Countdown && j.state() == LobbyState::Countdown,
    ));
    assert_eq!(host.error(), None);
    assert!(
        recorded
            .joiner
            .contains(&LobbyEvent::CountdownStarted { duration: countdown })
    );

    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(2),
        |h, j| h.state() == LobbyState::Playing && j.state() == LobbyState::Playing,
    ));
    assert!(recorded.host.contains(&LobbyEvent::GameStarted { role: Role::Host }));
    assert!(
        recorded
            .joiner
            .contains(&LobbyEvent::GameStarted { role: Role::Joiner })
    );
    assert!(host.endpoint().unwrap().is_healthy());
    assert!(joiner.endpoint().unwrap().is_healthy());
}

#[test]
fn test_joiner_cancels_countdown() {
    let mut recorded = Recorded::default();
    let (mut host, mut joiner) = connected_pair(COUNTDOWN_DURATION, &mut recorded);

    host.start_ready_check(Instant::now());
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(1),
        |_, j| j.state() == LobbyState::Countdown,
    ));
    assert!(recorded.joiner.contains(&LobbyEvent::CountdownStarted {
        duration: Duration::from_secs(3)
    }));

    joiner.cancel();
    assert_eq!(joiner.state(), LobbyState::ClientWaiting);
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(1),
        |h, _| h.state() == LobbyState::HostWaiting,
    ));
    assert!(recorded.host.contains(&LobbyEvent::CountdownCancelled));
    assert_eq!(joiner.state(), LobbyState::ClientWaiting);
}

#[test]
fn test_ready_check_times_out_without_joiner_reply() {
    let mut recorded = Recorded::default();
    let (mut host, joiner) = connected_pair(Duration::from_secs(3), &mut recorded);

    // The joiner never runs its update, so the ping goes unanswered.
    let start = Instant::now();
    host.start_ready_check(start);
    host.update(start + Duration::from_millis(1500));

    assert_eq!(host.state(), LobbyState::HostWaiting);
    assert_eq!(host.error(), Some(MSG_NOT_RESPONDING));
    assert!(!host.is_ready_check_pending());
    drop(joiner);
}

#[test]
fn test_joiner_quit_returns_both_to_main() {
    let mut recorded = Recorded::default();
    let (mut host, mut joiner) = connected_pair(Duration::from_millis(200), &mut recorded);

    host.start_ready_check(Instant::now());
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(2),
        |h, j| h.state() == LobbyState::Playing && j.state() == LobbyState::Playing,
    ));

    joiner.quit_to_main();
    assert_eq!(joiner.state(), LobbyState::Main);
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(1),
        |h, _| h.state() == LobbyState::Main,
    ));
    assert!(recorded.host.contains(&LobbyEvent::ReturnedToMainMenu));
    assert!(host.relay().is_none());
}

#[test]
fn test_host_returns_joiner_to_lobby() {
    let mut recorded = Recorded::default();
    let (mut host, mut joiner) = connected_pair(Duration::from_millis(200), &mut recorded);

    host.start_ready_check(Instant::now());
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(2),
        |h, j| h.state() == LobbyState::Playing && j.state() == LobbyState::Playing,
    ));

    host.return_to_lobby();
    assert_eq!(host.state(), LobbyState::HostWaiting);
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(1),
        |_, j| j.state() == LobbyState::ClientWaiting,
    ));
    assert!(recorded.joiner.contains(&LobbyEvent::ReturnedToLobby));
}

#[test]
fn test_respawning_player_replicated() {
    let relay = Relay::start(relay_config()).unwrap();
    let address = relay.reachable_address();
    let host = Endpoint::connect(&address, endpoint_config()).unwrap();
    let joiner = Endpoint::connect(&address, endpoint_config()).unwrap();

    let mut world = GameWorld::new();
    world.add_player(0, Vec2::new(100.0, 100.0));
    world.add_player(1, Vec2::new(700.0, 500.0));
    world.set_status(GameStatus::Playing);
    let world = Arc::new(Mutex::new(world));

    let config = SyncConfig::default();
    let mut host_sync = HostSync::new(Arc::clone(&world), 0, &config);
    host_sync.attach(&host);

    let mut replica_world = GameWorld::new();
    replica_world.add_player(0, Vec2::new(100.0, 100.0));
    replica_world.add_player(1, Vec2::new(700.0, 500.0));
    let replica = Replica::new(replica_world, &config);
    replica.attach(&joiner);

    {
        let mut world = world.lock().unwrap();
        let player = world.player_mut(1).unwrap();
        player.position = Vec2::new(650.0, 500.0);
        player.kill(Instant::now());
    }
    assert!(host_sync.tick(Instant::now(), &host));

    let start = Instant::now();
    while replica.snapshots_applied() == 0 && start.elapsed() < Duration::from_secs(1) {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(replica.snapshots_applied(), 1);

    let now = Instant::now();
    replica.with_world(|world| {
        assert_eq!(world.status(), GameStatus::Playing);
        let player = world.player(1).unwrap();
        assert_eq!(player.health, 0);
        assert!(!player.is_alive);
        assert!(player.is_respawning);
        let remaining = player.respawn_remaining(now);
        assert!(remaining <= RESPAWN_DELAY);
        assert!(remaining > RESPAWN_DELAY - Duration::from_millis(500));
    });

    let interp = replica.player_interpolation(1).unwrap();
    assert_eq!(interp.target, Vec2::new(650.0, 500.0));
    assert_eq!(interp.start, Vec2::new(700.0, 500.0));

    replica.advance(Instant::now() + Duration::from_secs(1));
    replica.with_world(|world| {
        assert_eq!(world.player(1).unwrap().position, Vec2::new(650.0, 500.0));
    });
    assert_eq!(replica.interpolations_in_flight(), 0);
}

fn start_playing(host: &mut LobbySession, joiner: &mut LobbySession, recorded: &mut Recorded) {
    host.start_ready_check(Instant::now());
    assert!(pump_until(
        host,
        joiner,
        recorded,
        Duration::from_secs(2),
        |h, j| h.state() == LobbyState::Playing && j.state() == LobbyState::Playing,
    ));
}

/// Wires a host world and a joiner replica to the lobbies' endpoints the way
/// the front end does when the game starts.
fn start_match(host: &LobbySession, joiner: &LobbySession) -> (HostSync, Replica) {
    let mut world = GameWorld::with_timer(MATCH_DURATION);
    world.add_player(HOST_SLOT, Vec2::new(100.0, 300.0));
    world.add_player(JOINER_SLOT, Vec2::new(700.0, 300.0));
    let replica_world = world.clone();
    world.reset(Instant::now());

    let config = SyncConfig::default();
    let host_sync = HostSync::new(
        Arc::new(Mutex::new(world)),
        host.player_id().unwrap(),
        &config,
    );
    host_sync.attach(host.endpoint().unwrap());
    let replica = Replica::new(replica_world, &config);
    replica.attach(joiner.endpoint().unwrap());
    (host_sync, replica)
}

/// Ticks the host sync until the replica has applied a snapshot.
fn replicate(host: &LobbySession, host_sync: &mut HostSync, replica: &Replica) -> bool {
    let start = Instant::now();
    let applied = replica.snapshots_applied();
    while start.elapsed() < Duration::from_secs(1) {
        host_sync.tick(Instant::now(), host.endpoint().unwrap());
        if replica.snapshots_applied() > applied {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn wait_for_command(host_sync: &HostSync, expected: &HostCommand) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(1) {
        if host_sync.poll_commands().contains(expected) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_world_playing_on_both_peers_after_countdown() {
    let mut recorded = Recorded::default();
    let (mut host, mut joiner) = connected_pair(Duration::from_millis(200), &mut recorded);
    start_playing(&mut host, &mut joiner, &mut recorded);

    let (mut host_sync, replica) = start_match(&host, &joiner);
    assert_eq!(replica.with_world(GameWorld::status), GameStatus::Waiting);

    assert!(replicate(&host, &mut host_sync, &replica));
    assert_eq!(duel::lock(host_sync.world()).status(), GameStatus::Playing);
    replica.with_world(|world| {
        assert_eq!(world.status(), GameStatus::Playing);
        assert!(world.timer().is_active());
        assert_eq!(world.players().count(), 2);
    });
}

#[test]
fn test_second_round_after_return_to_lobby() {
    let mut recorded = Recorded::default();
    let (mut host, mut joiner) = connected_pair(Duration::from_millis(200), &mut recorded);
    start_playing(&mut host, &mut joiner, &mut recorded);

    host.return_to_lobby();
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(1),
        |_, j| j.state() == LobbyState::ClientWaiting,
    ));

    start_playing(&mut host, &mut joiner, &mut recorded);
    let started = |events: &[LobbyEvent]| {
        events
            .iter()
            .filter(|e| matches!(e, LobbyEvent::GameStarted { .. }))
            .count()
    };
    assert_eq!(started(&recorded.host), 2);
    assert_eq!(started(&recorded.joiner), 2);

    let (mut host_sync, replica) = start_match(&host, &joiner);
    assert!(replicate(&host, &mut host_sync, &replica));
    assert_eq!(replica.with_world(GameWorld::status), GameStatus::Playing);

    let input = PlayerInput::directional(InputAction::Move, joiner.player_id().unwrap(), 0.0, 1.0);
    assert!(sync::send_input(joiner.endpoint().unwrap(), input));
    assert!(wait_for_command(
        &host_sync,
        &HostCommand::Move {
            player_id: JOINER_SLOT,
            dx: 0.0,
            dy: 1.0
        }
    ));
}

#[test]
fn test_rejoined_joiner_drives_its_slot() {
    let registry = Arc::new(SessionRegistry::in_memory());
    let countdown = Duration::from_millis(200);
    let mut recorded = Recorded::default();
    let (mut host, mut joiner) = connected_pair_with(
        short_liveness(&registry, countdown),
        short_liveness(&registry, countdown),
        &mut recorded,
    );
    let code = host.code().unwrap();

    // Walking away from the waiting room leaves the relay slot to the sweep.
    joiner.cancel();
    assert_eq!(joiner.state(), LobbyState::Main);
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(2),
        |h, _| h.participant_count() == 1,
    ));
    assert!(recorded.host.contains(&LobbyEvent::ParticipantLeft { player_id: 1 }));
    assert_eq!(host.state(), LobbyState::HostWaiting);

    joiner.begin_join();
    joiner.submit_code(code.as_str());
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(3),
        |h, j| j.state() == LobbyState::ClientWaiting && h.participant_count() == 2,
    ));
    assert_eq!(joiner.player_id(), Some(2));

    start_playing(&mut host, &mut joiner, &mut recorded);
    let (host_sync, _replica) = start_match(&host, &joiner);

    let input = PlayerInput::directional(InputAction::Move, 2, -1.0, 0.0);
    assert!(sync::send_input(joiner.endpoint().unwrap(), input));
    assert!(wait_for_command(
        &host_sync,
        &HostCommand::Move {
            player_id: JOINER_SLOT,
            dx: -1.0,
            dy: 0.0
        }
    ));
}

#[test]
fn test_cancel_while_connecting_then_rejoin() {
    let registry = Arc::new(SessionRegistry::in_memory());
    let countdown = Duration::from_millis(200);

    // A session whose relay never answers.
    let unreachable = UdpSocket::bind("127.0.0.1:0").unwrap();
    unreachable
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    let quiet = SessionCode::parse("QUIET").unwrap();
    registry
        .register(&quiet, &Address::from(unreachable.local_addr().unwrap()))
        .unwrap();

    let mut host = LobbySession::new(lobby_config(&registry, countdown));
    let mut joiner = LobbySession::new(lobby_config(&registry, countdown));
    host.host();
    let code = host.code().unwrap();

    joiner.begin_join();
    joiner.submit_code("QUIET");
    assert_eq!(joiner.state(), LobbyState::Connecting);
    let mut buf = [0u8; 2048];
    let (size, _) = unreachable.recv_from(&mut buf).unwrap();
    assert_eq!(Message::decode(&buf[..size]).unwrap(), Message::Connect);

    joiner.cancel();
    assert_eq!(joiner.state(), LobbyState::Main);
    assert_eq!(joiner.error(), None);

    joiner.begin_join();
    joiner.submit_code(code.as_str());
    let mut recorded = Recorded::default();
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(3),
        |h, j| j.state() == LobbyState::ClientWaiting && h.participant_count() == 2,
    ));
    assert_eq!(joiner.player_id(), Some(1));
    assert!(
        !recorded
            .joiner
            .iter()
            .any(|e| matches!(e, LobbyEvent::ConnectionLost { .. }))
    );

    // The abandoned handshake went quiet.
    unreachable
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    while unreachable.recv_from(&mut buf).is_ok() {}
    unreachable
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    assert!(unreachable.recv_from(&mut buf).is_err());
}

#[test]
fn test_immediate_rejoin_after_cancelled_connect() {
    let registry = Arc::new(SessionRegistry::in_memory());
    let countdown = Duration::from_millis(200);
    let mut host = LobbySession::new(short_liveness(&registry, countdown));
    let mut joiner = LobbySession::new(short_liveness(&registry, countdown));
    host.host();
    let code = host.code().unwrap();

    joiner.begin_join();
    joiner.submit_code(code.as_str());
    joiner.cancel();
    joiner.begin_join();
    joiner.submit_code(code.as_str());
    assert_eq!(joiner.state(), LobbyState::Connecting);

    let mut recorded = Recorded::default();
    assert!(pump_until(
        &mut host,
        &mut joiner,
        &mut recorded,
        Duration::from_secs(3),
        |h, j| j.state() == LobbyState::ClientWaiting && h.participant_count() == 2,
    ));

    start_playing(&mut host, &mut joiner, &mut recorded);
    let (host_sync, _replica) = start_match(&host, &joiner);
    let input = PlayerInput::new(InputAction::Shoot, joiner.player_id().unwrap());
    assert!(sync::send_input(joiner.endpoint().unwrap(), input));
    assert!(wait_for_command(
        &host_sync,
        &HostCommand::Shoot {
            player_id: JOINER_SLOT
        }
    ));
}
