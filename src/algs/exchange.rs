//! Two-phase sized exchange between ranks.
//!
//! The distribution protocol never receives from a wildcard source. Every
//! round first fixes the peer set (an all-to-all handshake of "I will send to
//! you" flags), then exchanges per-peer byte counts, then the payloads. Each
//! phase ends in a barrier so that no rank starts the next round while a peer
//! is still matching messages of the current one. All handles are drained
//! before returning, even if an error occurred.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireLen, cast_slice, cast_slice_mut};
use crate::mesh_error::{CommError, DgMeshError};
use std::collections::{BTreeMap, BTreeSet};

/// All-to-all handshake: returns the ranks that will send to this rank.
pub fn discover_peers<C: Communicator>(comm: &C, send_to: &BTreeSet<usize>) -> BTreeSet<usize> {
    let size = comm.size();
    let me = comm.rank();
    let mut flags = vec![0u8; size];
    for &p in send_to {
        if p < size {
            flags[p] = 1;
        }
    }
    let mut all = vec![0u8; size * size];
    comm.allgather(&flags, &mut all);
    (0..size).filter(|&src| all[src * size + me] == 1).collect()
}

/// Exchange the byte length of each outgoing payload. Returns `peer → len`
/// for every peer in `recv_from`.
pub fn exchange_lengths<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    recv_from: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, usize>, DgMeshError> {
    let me = comm.rank();

    // 1) post all receives
    let mut recv_size: Vec<(usize, C::RecvHandle)> = Vec::with_capacity(recv_from.len());
    for &nbr in recv_from.iter().filter(|&&n| n != me) {
        let mut cnt = WireLen::new(0);
        let h = comm.irecv(nbr, tag.as_u16(), cast_slice_mut(std::slice::from_mut(&mut cnt)));
        recv_size.push((nbr, h));
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&nbr, payload) in outgoing.iter().filter(|(n, _)| **n != me) {
        let len = WireLen::new(payload.len());
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(std::slice::from_ref(&len))));
    }

    // 3) wait for all recvs (but do not early-return)
    let mut sizes_in = BTreeMap::new();
    if recv_from.contains(&me) {
        sizes_in.insert(me, outgoing.get(&me).map_or(0, Vec::len));
    }
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireLen>() => {
                let mut cnt = WireLen::new(0);
                cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                sizes_in.insert(nbr, cnt.get());
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(DgMeshError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireLen>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(DgMeshError::CommError {
                    neighbor: nbr,
                    source: CommError(format!("failed to receive size from rank {nbr}")),
                });
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    comm.barrier();

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Exchange payloads whose lengths are already known on the receiving side.
pub fn exchange_sized_payloads<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    lengths: &BTreeMap<usize, usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, DgMeshError> {
    let me = comm.rank();

    let mut recv_data: Vec<(usize, usize, C::RecvHandle)> = Vec::with_capacity(lengths.len());
    for (&nbr, &len) in lengths.iter().filter(|(n, _)| **n != me) {
        let mut buffer = vec![0u8; len];
        let h = comm.irecv(nbr, tag.as_u16(), &mut buffer);
        recv_data.push((nbr, len, h));
    }

    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&nbr, payload) in outgoing.iter().filter(|(n, _)| **n != me) {
        pending_sends.push(comm.isend(nbr, tag.as_u16(), payload));
    }

    let mut received = BTreeMap::new();
    if lengths.contains_key(&me) {
        received.insert(me, outgoing.get(&me).cloned().unwrap_or_default());
    }
    let mut maybe_err = None;
    for (nbr, len, h) in recv_data {
        match h.wait() {
            Some(data) if data.len() == len => {
                received.insert(nbr, data);
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(DgMeshError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: len,
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(DgMeshError::CommError {
                    neighbor: nbr,
                    source: CommError(format!("no payload received from rank {nbr}")),
                });
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }
    comm.barrier();

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

/// Sizes then payloads, for a known set of senders. Uses `tag` and `tag + 1`.
pub fn exchange_payloads<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    recv_from: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, DgMeshError> {
    let lengths = exchange_lengths(comm, tag, outgoing, recv_from)?;
    exchange_sized_payloads(comm, tag.offset(1), outgoing, &lengths)
}

/// Handshake, sizes, then payloads: the full sparse exchange for rounds where
/// the receiver does not know who will send.
pub fn sparse_exchange<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
) -> Result<BTreeMap<usize, Vec<u8>>, DgMeshError> {
    let send_to: BTreeSet<usize> = outgoing.keys().copied().collect();
    let recv_from = discover_peers(comm, &send_to);
    log::debug!(
        "rank {}: exchange tag {:#06x} sends to {:?}, receives from {:?}",
        comm.rank(),
        tag.as_u16(),
        send_to,
        recv_from
    );
    exchange_payloads(comm, tag, outgoing, &recv_from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn serial_exchange_keeps_self_message() {
        let comm = NoComm;
        let mut out = BTreeMap::new();
        out.insert(0usize, vec![1u8, 2, 3]);
        let got = sparse_exchange(&comm, CommTag::new(0x10), &out).unwrap();
        assert_eq!(got.get(&0), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn ring_exchange_on_three_ranks() {
        let comms = LocalComm::cluster(3);
        let results: Vec<BTreeMap<usize, Vec<u8>>> = std::thread::scope(|s| {
            let hs: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let next = (c.rank() + 1) % c.size();
                        let mut out = BTreeMap::new();
                        out.insert(next, vec![c.rank() as u8; c.rank() + 1]);
                        sparse_exchange(c, CommTag::new(0x20), &out).unwrap()
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0].get(&2), Some(&vec![2, 2, 2]));
        assert_eq!(results[1].get(&0), Some(&vec![0]));
        assert_eq!(results[2].get(&1), Some(&vec![1, 1]));
        assert!(results.iter().all(|m| m.len() == 1));
    }

    #[test]
    fn peers_discovered_from_flags() {
        let comms = LocalComm::cluster(2);
        let got: Vec<BTreeSet<usize>> = std::thread::scope(|s| {
            let hs: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        // only rank 0 sends (to 1)
                        let to: BTreeSet<usize> =
                            if c.rank() == 0 { [1].into() } else { BTreeSet::new() };
                        discover_peers(c, &to)
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(got[0].is_empty());
        assert_eq!(got[1], [0].into());
    }
}
