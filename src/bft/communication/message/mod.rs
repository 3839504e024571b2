//! Wire message types traded between replicas, and between a replica
//! and the client proxy in front of it.

use std::mem::MaybeUninit;

#[cfg(feature = "serialize_serde")]
use serde::{Serialize, Deserialize};

use crate::bft::crypto::hash::Digest;
use crate::bft::crypto::signature::Signature;
use crate::bft::crypto::SignatureInfo;
use crate::bft::communication::NodeId;
use crate::bft::ordering::SeqNo;
use crate::bft::error::*;

/// A header that is sent before a message in transit in the wire.
///
/// A fixed amount of `Header::LENGTH` bytes are read before a message
/// is read. Contains the protocol version, message length, as well as
/// other metadata.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct Header {
    pub(crate) version: u32,
    pub(crate) from: u32,
    pub(crate) to: u32,
    pub(crate) length: u64,
    pub(crate) signature: [u8; Signature::LENGTH],
}

/// A message to be sent over the wire. The payload should be a
/// serialized `SystemMessage`, for correctness.
#[derive(Debug)]
pub struct WireMessage<'a> {
    pub(crate) header: Header,
    pub(crate) payload: &'a [u8],
}

/// Envelope carrying a request body together with the client's
/// signature over it, exactly as it is stored in the request log.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct SignedEnvelope<O> {
    pub operation: O,
    pub proxy_id: u64,
    pub client_seq: u64,
    #[cfg_attr(feature = "serialize_serde", serde(skip))]
    pub signature: Option<Signature>,
}

/// A `SystemMessage` corresponds to a message regarding one of the
/// protocol's sub-components.
#[derive(Clone)]
pub enum SystemMessage<O = Vec<u8>> {
    Request(RequestMessage<O>),
    Consensus(ConsensusMessage),
    Checkpoint(CheckpointMessage),
    ViewChange(ViewChangeMessage),
    NewView(NewViewMessage),
    Recovery(RecoveryMessage),
    Query(QueryMessage),
    Response(ResponseMessage),
    StatusSync(StatusSyncMessage),
    Forward(ForwardedRequest),
}

/// Represents a request from a client.
#[derive(Clone)]
pub struct RequestMessage<O> {
    envelope: SignedEnvelope<O>,
}

impl<O> RequestMessage<O> {
    pub fn new(envelope: SignedEnvelope<O>) -> Self {
        Self { envelope }
    }

    pub fn envelope(&self) -> &SignedEnvelope<O> {
        &self.envelope
    }

    pub fn into_envelope(self) -> SignedEnvelope<O> {
        self.envelope
    }
}

/// A message from the three-phase commitment sub-protocol.
#[derive(Debug, Clone)]
pub struct ConsensusMessage {
    seq: SeqNo,
    view: u64,
    kind: ConsensusMessageKind,
}

/// Distinguishes pre-prepare/prepare/commit phases.
#[derive(Debug, Clone)]
pub enum ConsensusMessageKind {
    /// Pre-prepare a request. The `Digest` is the hash of the
    /// serialized request payload; `None` denotes a null pre-prepare
    /// synthesized during view change for an empty slot.
    PrePrepare(Option<Digest>),
    /// Prepare a request previously pre-prepared with this digest.
    Prepare(Digest),
    /// Commit a request, signaling this replica is ready to execute it.
    Commit(Digest),
}

impl ConsensusMessage {
    pub fn new(seq: SeqNo, view: u64, kind: ConsensusMessageKind) -> Self {
        Self { seq, view, kind }
    }

    pub fn sequence_number(&self) -> SeqNo {
        self.seq
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn kind(&self) -> &ConsensusMessageKind {
        &self.kind
    }
}

/// A checkpoint vote: `(seq, hash)` plus the sender's identity,
/// matching `ProcessCheckPoint`'s sender/sign/hash maps.
#[derive(Debug, Clone)]
pub struct CheckpointMessage {
    pub seq: SeqNo,
    pub hash: Digest,
}

/// A client complaining the primary is silent, or a replica
/// broadcasting its own VIEW_CHANGE vote. `p_set` carries the
/// prepared-request proofs for every sequence number above the
/// replica's last stable checkpoint.
#[derive(Debug, Clone)]
pub struct ViewChangeMessage {
    pub view: u64,
    pub checkpoint: StableCheckpointProof,
    pub p_set: Vec<PreparedProof>,
}

/// Proof that `seq` was prepared with `digest`, backed by `Q`
/// matching PREPARE votes.
#[derive(Debug, Clone)]
pub struct PreparedProof {
    pub seq: SeqNo,
    pub digest: Digest,
    pub view: u64,
}

/// Signed proof that a checkpoint at `seq`/`hash` is stable.
#[derive(Debug, Clone)]
pub struct StableCheckpointProof {
    pub seq: SeqNo,
    pub hash: Digest,
    pub signatures: Vec<SignatureInfo>,
}

/// Sent by the new primary once it gathers `Q` valid VIEW_CHANGE
/// votes; reconstructs a PRE_PREPARE for every sequence number
/// between the lowest and highest prepared value seen.
#[derive(Debug, Clone)]
pub struct NewViewMessage {
    pub view: u64,
    pub viewchange_proofs: Vec<ViewChangeMessage>,
    pub pre_prepares: Vec<ConsensusMessage>,
}

/// Requests a state snapshot from a peer during recovery.
#[derive(Debug, Clone)]
pub struct RecoveryMessage {
    pub requester: NodeId,
    pub from_seq: SeqNo,
}

/// Liveness/status probe broadcast periodically by the checkpoint
/// manager (STATUS_SYNC in the original).
#[derive(Debug, Clone)]
pub struct StatusSyncMessage {
    pub sender: NodeId,
    pub stable_seq: SeqNo,
}

/// A read-only query against committed state.
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub key: Vec<u8>,
}

/// Reply routed back to the client proxy via `Context`.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub proxy_id: u64,
    pub client_seq: u64,
    pub result: Vec<u8>,
}

/// A request a backup received directly from a proxy, relayed to the
/// current primary because the backup itself cannot assign a sequence
/// number. `from` is the original proxy, so the primary can still
/// route a RESPONSE (or a negative one, on backpressure) straight back
/// to it rather than through the relaying backup.
#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    pub digest: Digest,
    pub from: NodeId,
}

impl Header {
    /// The size of the memory representation of the `Header` in bytes.
    pub const LENGTH: usize = std::mem::size_of::<Self>();

    unsafe fn serialize_into_unchecked(self, buf: &mut [u8]) {
        #[cfg(target_endian = "big")]
        let this = Header {
            version: self.version.to_le(),
            from: self.from.to_le(),
            to: self.to.to_le(),
            length: self.length.to_le(),
            signature: self.signature,
        };
        #[cfg(not(target_endian = "big"))]
        let this = self;
        let hdr: [u8; Self::LENGTH] = std::mem::transmute(this);
        (&mut buf[..Self::LENGTH]).copy_from_slice(&hdr[..]);
    }

    /// Serialize a `Header` into a byte buffer of appropriate size.
    pub fn serialize_into(self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < Self::LENGTH {
            return Err("buffer is too short to serialize into")
                .wrapped(ErrorKind::Communication);
        }
        Ok(unsafe { self.serialize_into_unchecked(buf) })
    }

    unsafe fn deserialize_from_unchecked(buf: &[u8]) -> Self {
        let mut hdr: [u8; Self::LENGTH] = {
            let hdr = MaybeUninit::uninit();
            hdr.assume_init()
        };
        (&mut hdr[..]).copy_from_slice(&buf[..Self::LENGTH]);
        let hdr: Header = std::mem::transmute(hdr);
        #[cfg(target_endian = "big")]
        {
            return Header {
                version: hdr.version.to_be(),
                from: hdr.from.to_be(),
                to: hdr.to.to_be(),
                length: hdr.length.to_be(),
                signature: hdr.signature,
            };
        }
        #[cfg(not(target_endian = "big"))]
        hdr
    }

    /// Deserialize a `Header` from a byte buffer of appropriate size.
    pub fn deserialize_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer is too short to deserialize from")
                .wrapped(ErrorKind::Communication);
        }
        Ok(unsafe { Self::deserialize_from_unchecked(buf) })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn from(&self) -> NodeId {
        NodeId::from(self.from)
    }

    pub fn to(&self) -> NodeId {
        NodeId::from(self.to)
    }
}

impl<'a> WireMessage<'a> {
    /// The current version of the wire protocol.
    pub const CURRENT_VERSION: u32 = 0;

    /// Constructs a new message to be sent over the wire.
    pub fn new(from: NodeId, to: NodeId, payload: &'a [u8], sig: Signature) -> Self {
        let mut signature = [0; Signature::LENGTH];
        signature.copy_from_slice(sig.as_ref());
        let (from, to): (u32, u32) = (from.into(), to.into());
        let header = Header {
            version: Self::CURRENT_VERSION,
            length: payload.len() as u64,
            signature,
            from,
            to,
        };
        Self { header, payload }
    }

    pub fn from_parts(header: Header, payload: &'a [u8]) -> Result<Self> {
        let wm = Self { header, payload };
        if !wm.is_valid() {
            return Err("malformed wire message")
                .wrapped(ErrorKind::MalformedMessage);
        }
        Ok(wm)
    }

    pub fn into_inner(self) -> (Header, &'a [u8]) {
        (self.header, self.payload)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Checks the structural correctness of the `WireMessage`;
    /// signature verification happens one layer up, once the
    /// sender's public key has been resolved.
    pub fn is_valid(&self) -> bool {
        self.header.version == Self::CURRENT_VERSION
            && self.header.length as usize == self.payload.len()
    }
}
