// SPDX-License-Identifier: Apache-2.0
//! LAN host: non-blocking UDP with a reliable-ordered channel per peer.
//!
//! Wire frames are `kind:u8` followed by kind-specific fields:
//!
//! ```text
//! SYN                 kind
//! SYN_ACK             kind
//! DATA                kind seq:u32 payload
//! ACK                 kind next_expected:u32
//! FIN                 kind
//! ```
//!
//! Each DATA carries a per-peer sequence number; receivers deliver in
//! sequence, hold early arrivals in a reorder buffer, and acknowledge
//! cumulatively. Unacknowledged frames retransmit on a timer with a little
//! jitter. Connection info on this transport is the peer's `ip:port` as
//! UTF-8 text.
//!
//! The discovery beacon is a second UDP socket on [`SCANNER_PORT`]: servers
//! answer any datagram with a [`LobbyInfo`]; scanning clients broadcast a
//! probe byte and collect replies.

use std::collections::{BTreeMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{trace, warn};

use gold_proto::{LobbyInfo, BASE_PORT, SCANNER_PORT, SCANNER_PROBE};

use crate::host::{Host, HostEvent, LobbyPrivacy, PeerId, PEER_PLAYER_UNKNOWN};

const FRAME_SYN: u8 = 1;
const FRAME_SYN_ACK: u8 = 2;
const FRAME_DATA: u8 = 3;
const FRAME_ACK: u8 = 4;
const FRAME_FIN: u8 = 5;

const MAX_DATAGRAM: usize = 1400;
const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(80);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PEER_TIMEOUT: Duration = Duration::from_secs(10);
/// How many ports above [`BASE_PORT`] to try before giving up.
const PORT_RANGE: u16 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PeerState {
    Connecting,
    Connected,
    Dead,
}

#[derive(Debug)]
struct LanPeer {
    addr: SocketAddr,
    state: PeerState,
    player_id: u8,
    next_send_seq: u32,
    recv_next_seq: u32,
    unacked: VecDeque<(u32, Vec<u8>, Instant)>,
    reorder: BTreeMap<u32, Vec<u8>>,
    last_heard: Instant,
    dialed_at: Instant,
}

impl LanPeer {
    fn new(addr: SocketAddr, state: PeerState) -> Self {
        let now = Instant::now();
        Self {
            addr,
            state,
            player_id: PEER_PLAYER_UNKNOWN,
            next_send_seq: 0,
            recv_next_seq: 0,
            unacked: VecDeque::new(),
            reorder: BTreeMap::new(),
            last_heard: now,
            dialed_at: now,
        }
    }
}

/// Reliable-ordered UDP peer host with LAN discovery.
#[derive(Debug)]
pub struct LanHost {
    socket: Option<UdpSocket>,
    scanner: Option<UdpSocket>,
    scanner_is_beacon: bool,
    lobby_name: String,
    lobby_open: bool,
    lobby_player_count: u8,
    peers: Vec<LanPeer>,
    events: VecDeque<HostEvent>,
}

impl Default for LanHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LanHost {
    /// A host with no sockets bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            socket: None,
            scanner: None,
            scanner_is_beacon: false,
            lobby_name: String::new(),
            lobby_open: false,
            lobby_player_count: 1,
            peers: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// Port the game socket is bound to, once bound.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|a| a.port())
    }

    fn bind_game_socket(&mut self) -> bool {
        if self.socket.is_some() {
            return true;
        }
        for port in BASE_PORT..BASE_PORT + PORT_RANGE {
            let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
            if let Ok(socket) = UdpSocket::bind(addr) {
                if socket.set_nonblocking(true).is_ok() {
                    self.socket = Some(socket);
                    return true;
                }
            }
        }
        // Fall back to an ephemeral port (clients don't need a known one).
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        match UdpSocket::bind(addr) {
            Ok(socket) if socket.set_nonblocking(true).is_ok() => {
                self.socket = Some(socket);
                true
            }
            _ => false,
        }
    }

    fn peer_for_addr(&mut self, addr: SocketAddr, state: PeerState) -> PeerId {
        if let Some(existing) = self.peers.iter().position(|p| p.addr == addr) {
            return existing as PeerId;
        }
        self.peers.push(LanPeer::new(addr, state));
        (self.peers.len() - 1) as PeerId
    }

    fn send_frame(&self, addr: SocketAddr, frame: &[u8]) {
        if let Some(socket) = &self.socket {
            if let Err(error) = socket.send_to(frame, addr) {
                trace!(%addr, %error, "udp send failed");
            }
        }
    }

    fn send_control(&self, addr: SocketAddr, kind: u8) {
        self.send_frame(addr, &[kind]);
    }

    fn send_ack(&self, addr: SocketAddr, next_expected: u32) {
        let mut frame = [0u8; 5];
        frame[0] = FRAME_ACK;
        frame[1..5].copy_from_slice(&next_expected.to_le_bytes());
        self.send_frame(addr, &frame);
    }

    fn handle_frame(&mut self, from: SocketAddr, frame: &[u8]) {
        let Some((kind, body)) = frame.split_first() else {
            return;
        };
        match *kind {
            FRAME_SYN => {
                // Every dial is accepted at the transport: the peer mesh
                // requires strangers to connect, and the session rejects
                // unwanted players at the greet.
                let peer = self.peer_for_addr(from, PeerState::Connecting);
                let was_connected = self.peers[peer as usize].state == PeerState::Connected;
                self.peers[peer as usize].state = PeerState::Connected;
                self.peers[peer as usize].last_heard = Instant::now();
                self.send_control(from, FRAME_SYN_ACK);
                if !was_connected {
                    self.events.push_back(HostEvent::Connected(peer));
                }
            }
            FRAME_SYN_ACK => {
                let peer = self.peer_for_addr(from, PeerState::Connecting);
                let entry = &mut self.peers[peer as usize];
                entry.last_heard = Instant::now();
                if entry.state == PeerState::Connecting {
                    entry.state = PeerState::Connected;
                    self.events.push_back(HostEvent::Connected(peer));
                }
            }
            FRAME_DATA => {
                if body.len() < 4 {
                    return;
                }
                let seq = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                let payload = &body[4..];
                let Some(peer) = self.peers.iter().position(|p| p.addr == from) else {
                    return;
                };
                let entry = &mut self.peers[peer];
                entry.last_heard = Instant::now();
                if seq == entry.recv_next_seq {
                    entry.recv_next_seq += 1;
                    self.events.push_back(HostEvent::Received {
                        peer: peer as PeerId,
                        data: payload.to_vec(),
                    });
                    // Drain any early arrivals now in sequence.
                    loop {
                        let entry = &mut self.peers[peer];
                        let next = entry.recv_next_seq;
                        match entry.reorder.remove(&next) {
                            Some(data) => {
                                entry.recv_next_seq += 1;
                                self.events.push_back(HostEvent::Received {
                                    peer: peer as PeerId,
                                    data,
                                });
                            }
                            None => break,
                        }
                    }
                } else if seq > self.peers[peer].recv_next_seq {
                    self.peers[peer].reorder.insert(seq, payload.to_vec());
                }
                let next_expected = self.peers[peer].recv_next_seq;
                self.send_ack(from, next_expected);
            }
            FRAME_ACK => {
                if body.len() < 4 {
                    return;
                }
                let next_expected = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                if let Some(entry) = self.peers.iter_mut().find(|p| p.addr == from) {
                    entry.last_heard = Instant::now();
                    while entry
                        .unacked
                        .front()
                        .is_some_and(|(seq, _, _)| *seq < next_expected)
                    {
                        entry.unacked.pop_front();
                    }
                }
            }
            FRAME_FIN => {
                if let Some(peer) = self.peers.iter().position(|p| p.addr == from) {
                    let entry = &mut self.peers[peer];
                    if entry.state != PeerState::Dead {
                        entry.state = PeerState::Dead;
                        let player_id = entry.player_id;
                        self.events.push_back(HostEvent::Disconnected { player_id });
                    }
                }
            }
            other => {
                trace!(kind = other, "dropping unknown lan frame");
            }
        }
    }

    fn run_timers(&mut self) {
        let now = Instant::now();
        let mut resends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        let mut drops: Vec<usize> = Vec::new();
        let mut rng = rand::rng();

        for (index, peer) in self.peers.iter_mut().enumerate() {
            match peer.state {
                PeerState::Connecting => {
                    if now.duration_since(peer.dialed_at) > CONNECT_TIMEOUT {
                        drops.push(index);
                    } else {
                        // Keep knocking; SYNs are idempotent.
                        resends.push((peer.addr, vec![FRAME_SYN]));
                    }
                }
                PeerState::Connected => {
                    if now.duration_since(peer.last_heard) > PEER_TIMEOUT {
                        drops.push(index);
                        continue;
                    }
                    // Jitter spreads retransmit bursts across peers.
                    let jitter = Duration::from_millis(rng.random_range(0..20));
                    for (seq, frame, sent_at) in &mut peer.unacked {
                        if now.duration_since(*sent_at) > RETRANSMIT_INTERVAL + jitter {
                            trace!(seq = *seq, "retransmitting");
                            resends.push((peer.addr, frame.clone()));
                            *sent_at = now;
                        }
                    }
                }
                PeerState::Dead => {}
            }
        }

        for (addr, frame) in resends {
            self.send_frame(addr, &frame);
        }
        for index in drops {
            let entry = &mut self.peers[index];
            entry.state = PeerState::Dead;
            let player_id = entry.player_id;
            warn!(player_id, "lan peer timed out");
            self.events.push_back(HostEvent::Disconnected { player_id });
        }
    }

    fn service_scanner(&mut self) {
        let Some(scanner) = &self.scanner else {
            return;
        };
        let mut buffer = [0u8; 512];
        loop {
            let (length, from) = match scanner.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(_) => break,
            };
            if self.scanner_is_beacon {
                if !self.lobby_open {
                    continue;
                }
                let info = LobbyInfo {
                    name: self.lobby_name.clone(),
                    port: self.local_port().unwrap_or(BASE_PORT),
                    player_count: self.lobby_player_count,
                };
                trace!(name = %info.name, port = info.port, "answering lobby probe");
                let _ = scanner.send_to(&info.encode(), from);
            } else if let Some(info) = LobbyInfo::decode(&buffer[..length]) {
                let connection_info =
                    format!("{}:{}", from.ip(), info.port).into_bytes();
                self.events.push_back(HostEvent::LobbyDiscovered {
                    info,
                    connection_info,
                });
            }
        }
    }
}

impl Host for LanHost {
    fn open_lobby(&mut self, name: &str, privacy: LobbyPrivacy) {
        if !self.bind_game_socket() {
            self.events.push_back(HostEvent::LobbyCreateFailed);
            return;
        }
        self.lobby_name = name.to_owned();
        self.lobby_open = privacy != LobbyPrivacy::Singleplayer;

        if self.lobby_open {
            // The beacon is best-effort; a busy scanner port just means the
            // lobby is invisible to scans, not unjoinable.
            let beacon = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SCANNER_PORT);
            match UdpSocket::bind(beacon) {
                Ok(socket) if socket.set_nonblocking(true).is_ok() => {
                    self.scanner = Some(socket);
                    self.scanner_is_beacon = true;
                }
                _ => warn!("lobby beacon port unavailable; lobby hidden from scans"),
            }
        }
        self.events.push_back(HostEvent::LobbyCreateSuccess);
    }

    fn close_lobby(&mut self) {
        self.lobby_open = false;
        if self.scanner_is_beacon {
            self.scanner = None;
            self.scanner_is_beacon = false;
        }
    }

    fn connect(&mut self, connection_info: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(connection_info) else {
            return false;
        };
        let Ok(addr) = text.parse::<SocketAddr>() else {
            return false;
        };
        if !self.bind_game_socket() {
            return false;
        }
        let peer = self.peer_for_addr(addr, PeerState::Connecting);
        self.peers[peer as usize].dialed_at = Instant::now();
        self.send_control(addr, FRAME_SYN);
        true
    }

    fn peer_count(&self) -> u16 {
        self.peers.len() as u16
    }

    fn peer_player_id(&self, peer: PeerId) -> u8 {
        self.peers
            .get(peer as usize)
            .map_or(PEER_PLAYER_UNKNOWN, |p| p.player_id)
    }

    fn set_peer_player_id(&mut self, peer: PeerId, player_id: u8) {
        if let Some(entry) = self.peers.get_mut(peer as usize) {
            entry.player_id = player_id;
        }
    }

    fn is_peer_connected(&self, peer: PeerId) -> bool {
        self.peers
            .get(peer as usize)
            .is_some_and(|p| p.state == PeerState::Connected)
    }

    fn peer_connection_info(&self, peer: PeerId) -> Vec<u8> {
        self.peers
            .get(peer as usize)
            .map_or_else(Vec::new, |p| p.addr.to_string().into_bytes())
    }

    fn disconnect_peers(&mut self, gently: bool) {
        if gently {
            for peer in &self.peers {
                if peer.state == PeerState::Connected {
                    self.send_control(peer.addr, FRAME_FIN);
                }
            }
        }
        self.peers.clear();
    }

    fn send(&mut self, peer: PeerId, data: &[u8]) {
        debug_assert!(data.len() + 5 <= MAX_DATAGRAM, "datagram too large");
        let Some(entry) = self.peers.get_mut(peer as usize) else {
            return;
        };
        if entry.state != PeerState::Connected {
            return;
        }
        let seq = entry.next_send_seq;
        entry.next_send_seq += 1;
        let mut frame = Vec::with_capacity(5 + data.len());
        frame.push(FRAME_DATA);
        frame.extend_from_slice(&seq.to_le_bytes());
        frame.extend_from_slice(data);
        entry.unacked.push_back((seq, frame.clone(), Instant::now()));
        let addr = entry.addr;
        self.send_frame(addr, &frame);
    }

    fn broadcast(&mut self, data: &[u8]) {
        for peer in 0..self.peers.len() {
            self.send(peer as PeerId, data);
        }
    }

    fn flush(&mut self) {
        // Frames go on the wire as they are queued; nothing to push.
    }

    fn service(&mut self) {
        self.service_scanner();

        if self.socket.is_some() {
            let mut buffer = [0u8; MAX_DATAGRAM];
            loop {
                let received = match &self.socket {
                    Some(socket) => socket.recv_from(&mut buffer),
                    None => break,
                };
                match received {
                    Ok((length, from)) => {
                        let frame = buffer[..length].to_vec();
                        self.handle_frame(from, &frame);
                    }
                    Err(_) => break,
                }
            }
        }

        self.run_timers();
    }

    fn poll_event(&mut self) -> Option<HostEvent> {
        self.events.pop_front()
    }

    fn scan_for_lobbies(&mut self) {
        if self.scanner.is_none() || self.scanner_is_beacon {
            let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
            match UdpSocket::bind(addr) {
                Ok(socket)
                    if socket.set_nonblocking(true).is_ok()
                        && socket.set_broadcast(true).is_ok() =>
                {
                    self.scanner = Some(socket);
                    self.scanner_is_beacon = false;
                }
                _ => {
                    warn!("could not open scan socket");
                    return;
                }
            }
        }
        if let Some(scanner) = &self.scanner {
            let target = SocketAddrV4::new(Ipv4Addr::BROADCAST, SCANNER_PORT);
            if scanner.send_to(&[SCANNER_PROBE], target).is_err() {
                warn!("lan scan broadcast failed");
            }
        }
    }

    fn set_lobby_player_count(&mut self, count: u8) {
        self.lobby_player_count = count;
    }
}
