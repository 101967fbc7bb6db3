//! # Channels
//!
//! Outgoing inter-cell traffic, batched per destination.
//!
//! ## Design
//!
//! ```text
//!   CellApp ──send(addr, msg)──▶ Channels { addr → Bundle }
//!                                     │ flush() once per tick
//!                                     ▼
//!                               dyn Transport ──▶ peer cell
//! ```
//!
//! - Messages to one address keep their order: they share one bundle and
//!   a bundle is delivered whole or not at all.
//! - A transport failure drops the bundle and is logged. There are no
//!   retries at this layer.
//! - [`LoopbackNetwork`] connects cells living in one process, for tests
//!   and the simulation binary.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use meridian_shared::Address;
use parking_lot::RwLock;
use tracing::{error, trace};

use crate::error::{CellError, CellResult};
use crate::message::{Bundle, CellMessage};

/// Delivers encoded bundles to other processes.
pub trait Transport {
    /// Address other processes reach us at.
    fn local_address(&self) -> Address;

    /// Sends one encoded bundle.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::ChannelFailed`] if the destination cannot be
    /// reached.
    fn send(&mut self, to: Address, data: Vec<u8>) -> CellResult<()>;
}

/// Channel statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelStats {
    /// Messages handed to a transport.
    pub messages_sent: u64,
    /// Bundles handed to a transport.
    pub bundles_sent: u64,
    /// Bytes handed to a transport.
    pub bytes_sent: u64,
    /// Bundles dropped on a transport failure.
    pub send_errors: u64,
}

/// One pending bundle per destination.
#[derive(Debug, Default)]
pub struct Channels {
    bundles: BTreeMap<Address, Bundle>,
    stats: ChannelStats,
}

impl Channels {
    /// Creates an empty set of channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message for `to`.
    pub fn send(&mut self, to: Address, message: &CellMessage) {
        trace!(%to, message = message.name(), entity = %message.entity(), "queued");
        self.bundles.entry(to).or_default().add(message);
    }

    /// Messages waiting for `to`.
    #[must_use]
    pub fn pending(&self, to: Address) -> u32 {
        self.bundles.get(&to).map_or(0, Bundle::len)
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.values().all(Bundle::is_empty)
    }

    /// Hands every non-empty bundle to `transport`.
    ///
    /// # Returns
    ///
    /// Number of bundles delivered.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> usize {
        let mut delivered = 0;
        for (to, bundle) in &mut self.bundles {
            if bundle.is_empty() {
                continue;
            }
            let count = bundle.len();
            let data = bundle.take();
            let size = data.len();
            match transport.send(*to, data) {
                Ok(()) => {
                    delivered += 1;
                    self.stats.bundles_sent += 1;
                    self.stats.messages_sent += u64::from(count);
                    self.stats.bytes_sent += size as u64;
                }
                Err(e) => {
                    self.stats.send_errors += 1;
                    error!(%to, messages = count, "dropping bundle: {}", e);
                }
            }
        }
        self.bundles.retain(|_, bundle| !bundle.is_empty());
        delivered
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

// ============================================================================
// LOOPBACK
// ============================================================================

/// A bundle received from another cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// Sender.
    pub from: Address,
    /// Encoded bundle.
    pub data: Vec<u8>,
}

/// In-process network connecting endpoints by address.
///
/// Cloning shares the same network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    routes: Arc<RwLock<HashMap<Address, Sender<Datagram>>>>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an endpoint at `address`, replacing any previous one.
    #[must_use]
    pub fn endpoint(&self, address: Address) -> LoopbackEndpoint {
        let (sender, receiver) = unbounded();
        self.routes.write().insert(address, sender);
        LoopbackEndpoint {
            address,
            network: self.clone(),
            receiver,
        }
    }

    /// Removes the endpoint at `address`. Later sends to it fail.
    pub fn disconnect(&self, address: Address) {
        self.routes.write().remove(&address);
    }

    /// Number of connected endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Returns true if no endpoint is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// One address on a [`LoopbackNetwork`].
pub struct LoopbackEndpoint {
    address: Address,
    network: LoopbackNetwork,
    receiver: Receiver<Datagram>,
}

impl LoopbackEndpoint {
    /// Next received bundle, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<Datagram> {
        self.receiver.try_recv().ok()
    }

    /// Every bundle received so far, in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<Datagram> {
        self.receiver.try_iter().collect()
    }
}

impl Transport for LoopbackEndpoint {
    fn local_address(&self) -> Address {
        self.address
    }

    fn send(&mut self, to: Address, data: Vec<u8>) -> CellResult<()> {
        let routes = self.network.routes.read();
        let sender = routes.get(&to).ok_or(CellError::ChannelFailed(to))?;
        sender
            .send(Datagram {
                from: self.address,
                data,
            })
            .map_err(|_| CellError::ChannelFailed(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode_bundle;
    use meridian_shared::EntityId;

    #[test]
    fn test_flush_batches_per_destination() {
        let network = LoopbackNetwork::new();
        let mut a = network.endpoint(Address::local(1));
        let b = network.endpoint(Address::local(2));

        let mut channels = Channels::new();
        channels.send(Address::local(2), &CellMessage::DelGhost { entity: EntityId(5) });
        channels.send(Address::local(2), &CellMessage::DelGhost { entity: EntityId(6) });
        assert_eq!(channels.pending(Address::local(2)), 2);

        assert_eq!(channels.flush(&mut a), 1);
        assert!(channels.is_empty());

        let received = b.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].from, Address::local(1));
        let messages = decode_bundle(&received[0].data).unwrap();
        assert_eq!(
            messages,
            vec![
                CellMessage::DelGhost { entity: EntityId(5) },
                CellMessage::DelGhost { entity: EntityId(6) },
            ]
        );
        assert_eq!(channels.stats().messages_sent, 2);
    }

    #[test]
    fn test_unknown_destination_drops_bundle() {
        let network = LoopbackNetwork::new();
        let mut a = network.endpoint(Address::local(1));

        let mut channels = Channels::new();
        channels.send(Address::local(9), &CellMessage::DelGhost { entity: EntityId(1) });
        assert_eq!(channels.flush(&mut a), 0);
        assert_eq!(channels.stats().send_errors, 1);
        assert!(channels.is_empty());
    }

    #[test]
    fn test_disconnect() {
        let network = LoopbackNetwork::new();
        let mut a = network.endpoint(Address::local(1));
        let _b = network.endpoint(Address::local(2));
        assert_eq!(network.len(), 2);

        network.disconnect(Address::local(2));
        assert!(a.send(Address::local(2), vec![1]).is_err());
        assert_eq!(a.local_address(), Address::local(1));
    }
}
