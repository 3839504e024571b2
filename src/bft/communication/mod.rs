//! Communication primitives: replica identity, wire message formats,
//! and the transport boundary the protocol components talk through.
//!
//! The wire transport itself (connection pool, framing, TLS) is an
//! external collaborator: components depend on the
//! [`ReplicaCommunicator`] trait, never on a concrete socket
//! implementation.

pub mod message;

use crate::bft::error::*;
use crate::bft::communication::message::SystemMessage;

#[cfg(feature = "serialize_serde")]
use serde::{Serialize, Deserialize};

/// A `NodeId` represents the id of a replica process in the replica
/// group.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn targets<I>(into_iterator: I) -> impl Iterator<Item = Self>
    where
        I: IntoIterator<Item = u32>,
    {
        into_iterator.into_iter().map(Self)
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> NodeId {
        NodeId(id)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> u32 {
        id.0 as u32
    }
}

/// Opaque handle used to reply to the client that originated a
/// request, without the protocol core knowing anything about the
/// actual proxy/transport in front of it.
pub struct Context {
    reply: Box<dyn FnOnce(SystemMessage) + Send>,
}

impl Context {
    pub fn new<F>(reply: F) -> Self
    where
        F: FnOnce(SystemMessage) + Send + 'static,
    {
        Context { reply: Box::new(reply) }
    }

    pub fn reply(self, message: SystemMessage) {
        (self.reply)(message)
    }
}

/// External collaborator used to exchange protocol messages with the
/// rest of the replica group. Implementations own the actual wire
/// transport (framing, retries, connection pooling); the protocol
/// components only ever see this trait.
pub trait ReplicaCommunicator: Send + Sync {
    /// Sends `message` to a single replica.
    fn send(&self, target: NodeId, message: SystemMessage) -> Result<()>;

    /// Sends `message` to every replica in the group, including self
    /// if `include_self` is set.
    fn broadcast(&self, message: SystemMessage, include_self: bool) -> Result<()>;
}
