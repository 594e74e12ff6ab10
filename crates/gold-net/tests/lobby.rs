// SPDX-License-Identifier: Apache-2.0

//! Lobby protocol over the loopback hub: handshake, rejections, mesh
//! introductions, and the ready flow.

#![allow(missing_docs)]

use gold_net::host::Host;
use gold_net::{
    LobbyPrivacy, LoopbackHub, NetworkEvent, NetworkStatus, PlayerStatus, Session, SessionError,
};
use gold_proto::{Message, APP_VERSION};

fn pump(sessions: &mut [&mut Session]) {
    for _ in 0..10 {
        for session in sessions.iter_mut() {
            session.service();
        }
    }
}

fn drain(session: &mut Session) -> Vec<NetworkEvent> {
    let mut events = Vec::new();
    while let Some(event) = session.poll_event() {
        events.push(event);
    }
    events
}

#[test]
fn client_joins_and_gets_assignments() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let client_host = hub.register();
    let server_info = server_host.connection_info();

    let mut server = Session::server_create(Box::new(server_host), "tex", LobbyPrivacy::Public);
    let mut client = Session::client_create(Box::new(client_host), "sal", &server_info);
    pump(&mut [&mut server, &mut client]);

    assert_eq!(client.status(), NetworkStatus::Connected);
    assert!(drain(&mut client)
        .iter()
        .any(|e| matches!(e, NetworkEvent::JoinedLobby)));
    assert_eq!(client.player_id(), 1);
    assert_eq!(client.player(0).name, "tex");
    assert_eq!(client.player(0).status, PlayerStatus::Host);
    assert_eq!(client.lobby_name(), "tex's Game");
    // Lowest free recolor after the host's 0.
    assert_eq!(client.player(1).recolor_id, 1);
    // Teams balance: host on 0, newcomer on 1.
    assert_eq!(client.player(1).team, 1);

    assert_eq!(server.player(1).name, "sal");
    assert_eq!(server.player(1).status, PlayerStatus::NotReady);
}

#[test]
fn third_player_meets_the_mesh() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let first_host = hub.register();
    let second_host = hub.register();
    let server_info = server_host.connection_info();

    let mut server = Session::server_create(Box::new(server_host), "tex", LobbyPrivacy::Public);
    let mut first = Session::client_create(Box::new(first_host), "sal", &server_info);
    pump(&mut [&mut server, &mut first]);
    let mut second = Session::client_create(Box::new(second_host), "doc", &server_info);
    pump(&mut [&mut server, &mut first, &mut second]);
    pump(&mut [&mut server, &mut first, &mut second]);

    // The first client learned about the newcomer peer-to-peer.
    assert_eq!(first.player(2).name, "doc");
    // And the newcomer got the first client's greet.
    assert_eq!(second.player(1).name, "sal");
    assert_eq!(second.player_id(), 2);
}

#[test]
fn ready_flags_gate_match_start() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let client_host = hub.register();
    let server_info = server_host.connection_info();

    let mut server = Session::server_create(Box::new(server_host), "tex", LobbyPrivacy::Public);
    let mut client = Session::client_create(Box::new(client_host), "sal", &server_info);
    pump(&mut [&mut server, &mut client]);

    let noise = gold_core::Noise::zeroed(8, 8);
    assert_eq!(
        server.start_match(1, &noise),
        Err(SessionError::NotAllReady)
    );
    assert_eq!(server.get_error(), Some(SessionError::NotAllReady));

    client.set_ready(true);
    pump(&mut [&mut server, &mut client]);
    assert!(server.are_all_players_ready());
    assert_eq!(server.get_error(), None);

    server.start_match(42, &noise).unwrap();
    pump(&mut [&mut server, &mut client]);
    let client_load = drain(&mut client).into_iter().find_map(|e| match e {
        NetworkEvent::MatchLoad { lcg_seed, noise } => Some((lcg_seed, noise)),
        _ => None,
    });
    let (seed, received_noise) = client_load.expect("client never got MATCH_LOAD");
    assert_eq!(seed, 42);
    assert_eq!(received_noise, noise);
    // Everyone flipped to not-ready for load sync.
    assert_eq!(client.player(1).status, PlayerStatus::NotReady);
}

#[test]
fn version_mismatch_is_rejected_without_state_change() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let mut rogue_host = hub.register();
    let server_info = server_host.connection_info();

    let mut server = Session::server_create(Box::new(server_host), "tex", LobbyPrivacy::Public);
    rogue_host.connect(&server_info);
    for _ in 0..10 {
        rogue_host.service();
        server.service();
    }
    rogue_host.send(
        0,
        &Message::GreetServer {
            username: "rogue".to_owned(),
            app_version: "9.9.9".to_owned(),
        }
        .encode(),
    );
    for _ in 0..10 {
        rogue_host.service();
        server.service();
    }

    let mut got_invalid_version = false;
    while let Some(event) = rogue_host.poll_event() {
        if let gold_net::HostEvent::Received { data, .. } = event {
            if Message::decode(&data) == Ok(Message::InvalidVersion) {
                got_invalid_version = true;
            }
        }
    }
    assert!(got_invalid_version);
    // Server's player list is unchanged.
    assert!(server
        .players()
        .iter()
        .skip(1)
        .all(|p| p.status == PlayerStatus::None));
}

#[test]
fn full_lobby_rejects_the_next_greeting() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let server_info = server_host.connection_info();
    let mut server = Session::server_create(Box::new(server_host), "tex", LobbyPrivacy::Public);

    let mut clients = Vec::new();
    for name in ["a", "b", "c"] {
        let host = hub.register();
        clients.push(Session::client_create(Box::new(host), name, &server_info));
    }
    for _ in 0..20 {
        server.service();
        for client in &mut clients {
            client.service();
        }
    }
    assert!(server
        .players()
        .iter()
        .all(|p| p.status != PlayerStatus::None));

    // A fifth greeting bounces with the connection-refusal message.
    let mut late_host = hub.register();
    late_host.connect(&server_info);
    for _ in 0..10 {
        late_host.service();
        server.service();
    }
    late_host.send(
        0,
        &Message::GreetServer {
            username: "late".to_owned(),
            app_version: APP_VERSION.to_owned(),
        }
        .encode(),
    );
    for _ in 0..10 {
        late_host.service();
        server.service();
    }
    let mut rejected = false;
    while let Some(event) = late_host.poll_event() {
        if let gold_net::HostEvent::Received { data, .. } = event {
            if Message::decode(&data) == Ok(Message::GameAlreadyStarted) {
                rejected = true;
            }
        }
    }
    assert!(rejected);
    let named: Vec<&str> = server
        .players()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert!(!named.contains(&"late"));
}

#[test]
fn chat_reaches_everyone_including_the_sender() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let client_host = hub.register();
    let server_info = server_host.connection_info();

    let mut server = Session::server_create(Box::new(server_host), "tex", LobbyPrivacy::Public);
    let mut client = Session::client_create(Box::new(client_host), "sal", &server_info);
    pump(&mut [&mut server, &mut client]);
    drain(&mut server);
    drain(&mut client);

    client.send_chat("howdy");
    pump(&mut [&mut server, &mut client]);

    let to_server = drain(&mut server);
    assert!(to_server.iter().any(|e| matches!(
        e,
        NetworkEvent::LobbyChat { player_id: 1, message } if message == "howdy"
    )));
    let to_client = drain(&mut client);
    assert!(to_client.iter().any(|e| matches!(
        e,
        NetworkEvent::LobbyChat { player_id: 1, message } if message == "howdy"
    )));
}
