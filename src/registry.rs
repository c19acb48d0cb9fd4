//! Connection registry
//!
//! Arena of live peers keyed by `PeerId`. Ids are handed out
//! monotonically and double as mio tokens, so a readiness event leads
//! straight to its peer.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::Registry;
use tracing::{debug, warn};

use crate::peer::{Peer, PeerLimits};
use crate::types::PeerId;

/// First id handed to a peer; token 0 belongs to the listener
pub const FIRST_PEER_ID: usize = 1;

/// All live peers
#[derive(Debug)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
    next_id: usize,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_id: FIRST_PEER_ID,
        }
    }

    /// Add an accepted stream and register it for read readiness
    pub fn insert(
        &mut self,
        stream: TcpStream,
        addr: SocketAddr,
        limits: PeerLimits,
        registry: &Registry,
    ) -> io::Result<PeerId> {
        let id = PeerId(self.next_id);
        let mut peer = Peer::new(id, stream, addr, limits);
        peer.register(registry)?;
        self.peers.insert(id, peer);
        self.advance_id();
        Ok(id)
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Deregister and drop a peer, closing its socket
    pub fn remove(&mut self, id: PeerId, registry: &Registry) -> Option<Peer> {
        let mut peer = self.peers.remove(&id)?;
        if let Err(e) = peer.deregister(registry) {
            warn!("Failed to deregister peer {}: {}", id, e);
        }
        peer.close();
        debug!("Total peers: {}", self.peers.len());
        Some(peer)
    }

    /// Remove every peer
    pub fn clear(&mut self, registry: &Registry) {
        let ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for id in ids {
            self.remove(id, registry);
        }
    }

    /// Queue `bytes` for every live peer except `except`
    ///
    /// Returns the number of peers the bytes were queued for, plus the
    /// peers that hit their output ceiling or whose registration could not
    /// be updated. Those are marked closed and must be removed by the caller.
    pub fn broadcast(
        &mut self,
        except: Option<PeerId>,
        bytes: &[u8],
        registry: &Registry,
    ) -> (usize, Vec<PeerId>) {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (&id, peer) in self.peers.iter_mut() {
            if Some(id) == except || peer.is_closed() {
                continue;
            }
            let newly_pending = match peer.queue(bytes) {
                Ok(newly_pending) => newly_pending,
                Err(e) => {
                    warn!("Dropping peer {} ({}): {}", id, peer.addr, e);
                    peer.close();
                    failed.push(id);
                    continue;
                }
            };
            if newly_pending {
                if let Err(e) = peer.sync_interest(registry) {
                    warn!("Failed to enable writes for peer {}: {}", id, e);
                    peer.close();
                    failed.push(id);
                    continue;
                }
            }
            delivered += 1;
        }

        (delivered, failed)
    }

    /// Whether any peer has output waiting
    pub fn has_pending_output(&self) -> bool {
        self.peers.values().any(Peer::has_pending_output)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Next free id, wrapping past `usize::MAX` and skipping live ones
    fn advance_id(&mut self) {
        loop {
            self.next_id = self.next_id.checked_add(1).unwrap_or(FIRST_PEER_ID);
            if !self.peers.contains_key(&PeerId(self.next_id)) {
                break;
            }
        }
    }
}
