// SPDX-License-Identifier: Apache-2.0
//! In-memory host for tests and offline play.
//!
//! A [`LoopbackHub`] holds any number of nodes in one process; datagrams move
//! between them on `service`. Delivery is reliable and ordered by
//! construction, which makes this the reference implementation of the host
//! contract.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::host::{Host, HostEvent, LobbyPrivacy, PeerId, PEER_PLAYER_UNKNOWN};

type NodeIndex = u32;

#[derive(Debug, Default)]
struct Node {
    inbox: VecDeque<Datagram>,
    alive: bool,
}

#[derive(Debug)]
enum Datagram {
    Dial(NodeIndex),
    DialAccepted(NodeIndex),
    Payload(NodeIndex, Vec<u8>),
    Hangup(NodeIndex),
}

#[derive(Debug, Default)]
struct HubInner {
    nodes: Vec<Node>,
}

/// Shared in-process switchboard.
#[derive(Clone, Debug, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    /// A hub with no nodes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and get its host endpoint.
    #[must_use]
    pub fn register(&self) -> LoopbackHost {
        let mut inner = self.inner.borrow_mut();
        let index = inner.nodes.len() as NodeIndex;
        inner.nodes.push(Node {
            inbox: VecDeque::new(),
            alive: true,
        });
        LoopbackHost {
            hub: self.inner.clone(),
            index,
            peers: Vec::new(),
            events: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
struct LoopbackPeer {
    node: NodeIndex,
    player_id: u8,
    connected: bool,
}

/// One endpoint on a [`LoopbackHub`].
#[derive(Debug)]
pub struct LoopbackHost {
    hub: Rc<RefCell<HubInner>>,
    index: NodeIndex,
    peers: Vec<LoopbackPeer>,
    events: VecDeque<HostEvent>,
}

impl LoopbackHost {
    /// Connection info other nodes can dial.
    #[must_use]
    pub fn connection_info(&self) -> Vec<u8> {
        self.index.to_le_bytes().to_vec()
    }

    fn peer_for_node(&mut self, node: NodeIndex) -> PeerId {
        if let Some(existing) = self.peers.iter().position(|p| p.node == node) {
            return existing as PeerId;
        }
        self.peers.push(LoopbackPeer {
            node,
            player_id: PEER_PLAYER_UNKNOWN,
            connected: false,
        });
        (self.peers.len() - 1) as PeerId
    }

    fn post(&self, to: NodeIndex, datagram: Datagram) {
        let mut inner = self.hub.borrow_mut();
        if let Some(node) = inner.nodes.get_mut(to as usize) {
            if node.alive {
                node.inbox.push_back(datagram);
            }
        }
    }
}

impl Host for LoopbackHost {
    fn open_lobby(&mut self, _name: &str, _privacy: LobbyPrivacy) {
        // Nothing to bind in-process; the session gates who may stay.
        self.events.push_back(HostEvent::LobbyCreateSuccess);
    }

    fn close_lobby(&mut self) {}

    fn connect(&mut self, connection_info: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 4]>::try_from(connection_info) else {
            return false;
        };
        let node = NodeIndex::from_le_bytes(bytes);
        if node == self.index {
            return false;
        }
        self.peer_for_node(node);
        self.post(node, Datagram::Dial(self.index));
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
        self.peers.get(peer as usize).is_some_and(|p| p.connected)
    }

    fn peer_connection_info(&self, peer: PeerId) -> Vec<u8> {
        self.peers
            .get(peer as usize)
            .map_or_else(Vec::new, |p| p.node.to_le_bytes().to_vec())
    }

    fn disconnect_peers(&mut self, _gently: bool) {
        for peer in &self.peers {
            if peer.connected {
                self.post(peer.node, Datagram::Hangup(self.index));
            }
        }
        self.peers.clear();
    }

    fn send(&mut self, peer: PeerId, data: &[u8]) {
        if let Some(entry) = self.peers.get(peer as usize) {
            if entry.connected {
                self.post(entry.node, Datagram::Payload(self.index, data.to_vec()));
            }
        }
    }

    fn broadcast(&mut self, data: &[u8]) {
        for peer in 0..self.peers.len() {
            self.send(peer as PeerId, data);
        }
    }

    fn flush(&mut self) {}

    fn service(&mut self) {
        let drained: Vec<Datagram> = {
            let mut inner = self.hub.borrow_mut();
            inner.nodes[self.index as usize].inbox.drain(..).collect()
        };
        for datagram in drained {
            match datagram {
                Datagram::Dial(from) => {
                    // Transports accept every dial: the peer mesh requires
                    // strangers to connect, and rejecting players is the
                    // session's job once they greet.
                    let peer = self.peer_for_node(from);
                    self.peers[peer as usize].connected = true;
                    self.post(from, Datagram::DialAccepted(self.index));
                    self.events.push_back(HostEvent::Connected(peer));
                }
                Datagram::DialAccepted(from) => {
                    let peer = self.peer_for_node(from);
                    self.peers[peer as usize].connected = true;
                    self.events.push_back(HostEvent::Connected(peer));
                }
                Datagram::Payload(from, data) => {
                    let peer = self.peer_for_node(from);
                    self.events.push_back(HostEvent::Received { peer, data });
                }
                Datagram::Hangup(from) => {
                    if let Some(peer) = self.peers.iter().position(|p| p.node == from) {
                        let player_id = self.peers[peer].player_id;
                        self.peers[peer].connected = false;
                        self.events.push_back(HostEvent::Disconnected { player_id });
                    }
                }
            }
        }
    }

    fn poll_event(&mut self) -> Option<HostEvent> {
        self.events.pop_front()
    }
}

impl Drop for LoopbackHost {
    fn drop(&mut self) {
        if let Some(node) = self.hub.borrow_mut().nodes.get_mut(self.index as usize) {
            node.alive = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_connects_both_sides() {
        let hub = LoopbackHub::new();
        let mut server = hub.register();
        let mut client = hub.register();
        server.open_lobby("test", LobbyPrivacy::Public);
        assert!(client.connect(&server.connection_info()));

        server.service();
        client.service();
        assert!(matches!(
            server.poll_event(),
            Some(HostEvent::LobbyCreateSuccess)
        ));
        assert!(matches!(server.poll_event(), Some(HostEvent::Connected(_))));
        assert!(matches!(client.poll_event(), Some(HostEvent::Connected(0))));
        assert!(client.is_peer_connected(0));
    }

    #[test]
    fn payloads_arrive_in_order() {
        let hub = LoopbackHub::new();
        let mut server = hub.register();
        let mut client = hub.register();
        server.open_lobby("test", LobbyPrivacy::Public);
        client.connect(&server.connection_info());
        server.service();
        client.service();

        client.send(0, b"one");
        client.send(0, b"two");
        server.service();
        let mut payloads = Vec::new();
        while let Some(event) = server.poll_event() {
            if let HostEvent::Received { data, .. } = event {
                payloads.push(data);
            }
        }
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn strangers_may_dial_without_an_open_lobby() {
        // The peer mesh depends on this: clients accept dials from other
        // clients they have never heard of.
        let hub = LoopbackHub::new();
        let mut a = hub.register();
        let mut b = hub.register();
        assert!(b.connect(&a.connection_info()));
        a.service();
        b.service();
        assert!(matches!(a.poll_event(), Some(HostEvent::Connected(_))));
        assert!(b.is_peer_connected(0));
    }
}
