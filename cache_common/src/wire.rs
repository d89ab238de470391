//! Wire-level rank entry layout.
//!
//! A single `PEER_CACHE_ENTRIES` message is a packed array of these. The
//! encoding below packs every field little-endian with no padding; this
//! workspace owns both ends of the wire, so it does not need to replicate
//! the originating C struct's alignment padding, only its field order and
//! semantics.

use crate::ids::{GroupUid, HostUid, SeqNum, SpGid};

/// Compile-time maximum number of shadow SPs carried per rank entry.
pub const MAX_SHADOW_SPS: usize = 8;

/// Compile-time maximum length of the opaque transport-level address.
pub const MAX_ADDR_LEN: usize = 64;

/// `peer.proc_info` plus the duplicated `host_info` and address fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub group_uid: GroupUid,
    pub group_rank: i64,
    pub group_size: i64,
    pub seq_num: SeqNum,
    pub n_local_ranks: i64,
    pub local_rank: i64,
    pub host_uid: HostUid,
    pub addr: Vec<u8>,
}

/// One rank entry as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEntryWire {
    pub set: bool,
    pub peer: PeerInfo,
    pub client_id: u64,
    pub shadow_service_procs: Vec<SpGid>,
}

impl RankEntryWire {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.set as u8);
        buf.extend_from_slice(&self.peer.group_uid.0.to_le_bytes());
        buf.extend_from_slice(&self.peer.group_rank.to_le_bytes());
        buf.extend_from_slice(&self.peer.group_size.to_le_bytes());
        buf.extend_from_slice(&self.peer.seq_num.0.to_le_bytes());
        buf.extend_from_slice(&self.peer.n_local_ranks.to_le_bytes());
        buf.extend_from_slice(&self.peer.local_rank.to_le_bytes());
        buf.extend_from_slice(&self.peer.host_uid.0.to_le_bytes());
        buf.extend_from_slice(&(self.peer.addr.len() as u64).to_le_bytes());
        let mut addr = self.peer.addr.clone();
        addr.resize(MAX_ADDR_LEN, 0);
        buf.extend_from_slice(&addr);
        buf.extend_from_slice(&self.client_id.to_le_bytes());
        buf.extend_from_slice(&(self.shadow_service_procs.len() as u32).to_le_bytes());
        for sp in &self.shadow_service_procs {
            buf.extend_from_slice(&sp.0.to_le_bytes());
        }
        // zero-pad the unused shadow slots so every entry is fixed-size
        for _ in self.shadow_service_procs.len()..MAX_SHADOW_SPS {
            buf.extend_from_slice(&0u64.to_le_bytes());
        }
        buf
    }

    pub const ENCODED_LEN: usize = 1 + 4 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + MAX_ADDR_LEN + 8 + 4 + MAX_SHADOW_SPS * 8;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let mut off = 0usize;
        let mut take = |n: usize| {
            let slice = &buf[off..off + n];
            off += n;
            slice
        };
        let set = take(1)[0] != 0;
        let group_uid = GroupUid(u32::from_le_bytes(take(4).try_into().unwrap()));
        let group_rank = i64::from_le_bytes(take(8).try_into().unwrap());
        let group_size = i64::from_le_bytes(take(8).try_into().unwrap());
        let seq_num = SeqNum(u64::from_le_bytes(take(8).try_into().unwrap()));
        let n_local_ranks = i64::from_le_bytes(take(8).try_into().unwrap());
        let local_rank = i64::from_le_bytes(take(8).try_into().unwrap());
        let host_uid = HostUid(u64::from_le_bytes(take(8).try_into().unwrap()));
        let addr_len = u64::from_le_bytes(take(8).try_into().unwrap()) as usize;
        let addr_bytes = take(MAX_ADDR_LEN);
        let addr = addr_bytes[..addr_len.min(MAX_ADDR_LEN)].to_vec();
        let client_id = u64::from_le_bytes(take(8).try_into().unwrap());
        let num_shadow = u32::from_le_bytes(take(4).try_into().unwrap()) as usize;
        let mut shadow_service_procs = Vec::with_capacity(num_shadow.min(MAX_SHADOW_SPS));
        for i in 0..MAX_SHADOW_SPS {
            let v = u64::from_le_bytes(take(8).try_into().unwrap());
            if i < num_shadow {
                shadow_service_procs.push(SpGid(v));
            }
        }
        Some(RankEntryWire {
            set,
            peer: PeerInfo {
                group_uid,
                group_rank,
                group_size,
                seq_num,
                n_local_ranks,
                local_rank,
                host_uid,
                addr,
            },
            client_id,
            shadow_service_procs,
        })
    }
}

/// Encodes a contiguous batch of rank entries, as carried by a single
/// `PEER_CACHE_ENTRIES` message: one or more rank entries laid out back
/// to back with no framing between them.
pub fn encode_batch(entries: &[RankEntryWire]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * RankEntryWire::ENCODED_LEN);
    for entry in entries {
        buf.extend_from_slice(&entry.encode());
    }
    buf
}

/// Decodes a contiguous batch. Returns `None` if the payload length is
/// not a whole multiple of one entry's encoded size, or if any entry
/// fails to decode.
pub fn decode_batch(buf: &[u8]) -> Option<Vec<RankEntryWire>> {
    if buf.len() % RankEntryWire::ENCODED_LEN != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(buf.len() / RankEntryWire::ENCODED_LEN);
    for chunk in buf.chunks_exact(RankEntryWire::ENCODED_LEN) {
        out.push(RankEntryWire::decode(chunk)?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RankEntryWire {
        RankEntryWire {
            set: true,
            peer: PeerInfo {
                group_uid: GroupUid(7),
                group_rank: 3,
                group_size: 2048,
                seq_num: SeqNum(1),
                n_local_ranks: 1,
                local_rank: 0,
                host_uid: HostUid(42),
                addr: vec![1, 2, 3, 4],
            },
            client_id: 99,
            shadow_service_procs: vec![SpGid(5), SpGid(6)],
        }
    }

    #[test]
    fn round_trips() {
        let entry = sample();
        let bytes = entry.encode();
        assert_eq!(bytes.len(), RankEntryWire::ENCODED_LEN);
        let decoded = RankEntryWire::decode(&bytes).expect("decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn truncated_buffer_rejected() {
        let bytes = sample().encode();
        assert!(RankEntryWire::decode(&bytes[..bytes.len() - 1]).is_none());
    }

    #[test]
    fn batch_round_trips() {
        let a = sample();
        let mut b = sample();
        b.peer.group_rank = 4;
        let encoded = encode_batch(&[a.clone(), b.clone()]);
        let decoded = decode_batch(&encoded).expect("decode batch");
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn misaligned_batch_rejected() {
        let encoded = encode_batch(&[sample()]);
        assert!(decode_batch(&encoded[..encoded.len() - 1]).is_none());
    }
}
