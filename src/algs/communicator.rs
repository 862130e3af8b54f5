//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange helpers call
//! `.wait()` on every handle before they trust a buffer, and drain every
//! handle even when an earlier one failed.
//!
//! One rank is driven by exactly one thread, so the trait carries no
//! `Send`/`Sync` bounds; the in-process [`LocalComm`] backend is `Send` and is
//! moved into one thread per rank.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Barrier};
use std::time::Duration;

/// Typed message tag. Distinct phases of a protocol use distinct tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag `k` steps after this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Tag reserved for the collectives emulated on top of point-to-point.
pub const COLLECTIVE_TAG: CommTag = CommTag::new(u16::MAX);

/// Non-blocking communication interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive. `buf.len()` is the expected message size; backends that
    /// probe (MPI) use the actual size and the caller validates it.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Block until every rank reached the barrier.
    fn barrier(&self);

    /// Gather equal-size contributions of all ranks, rank-ordered, into `recv`
    /// (`recv.len() == size() * send.len()`).
    fn allgather(&self, send: &[u8], recv: &mut [u8]);

    /// Terminate every rank with the given status.
    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-rank communicator for serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn barrier(&self) {}
    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        recv[..send.len()].copy_from_slice(send);
    }
}

// --- LocalComm: in-process cluster, one thread per rank ---

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug)]
struct LocalShared {
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    barrier: Barrier,
    size: usize,
}

/// In-process rank of a [`LocalComm::cluster`]. Ranks of one cluster share a
/// mailbox and a barrier; independent clusters never see each other's traffic.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<LocalShared>,
}

impl LocalComm {
    /// Create all `size` ranks of a fresh cluster.
    pub fn cluster(size: usize) -> Vec<LocalComm> {
        let size = size.max(1);
        let shared = Arc::new(LocalShared {
            mailbox: DashMap::new(),
            barrier: Barrier::new(size),
            size,
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn post(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.shared
            .mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }
}

/// Receive handle of [`LocalComm`]; polls the shared mailbox on `wait`.
pub struct LocalRecv {
    key: Key,
    shared: Arc<LocalShared>,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let mut backoff = Backoff::default();
        loop {
            if let Some(mut queue) = self.shared.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            backoff.snooze();
        }
    }
}

/// Idle strategy of a polling receive: a few yields, then parks of doubling
/// length up to [`Backoff::MAX_PARK`].
#[derive(Debug, Default)]
struct Backoff {
    step: u32,
}

impl Backoff {
    const YIELDS: u32 = 8;
    const MAX_PARK: Duration = Duration::from_millis(1);

    /// Park duration of the current step, `None` while still yielding.
    fn park_time(&self) -> Option<Duration> {
        let k = self.step.checked_sub(Self::YIELDS)?;
        let micros = 1u64 << k.min(10);
        Some(Duration::from_micros(micros).min(Self::MAX_PARK))
    }

    fn snooze(&mut self) {
        match self.park_time() {
            None => std::thread::yield_now(),
            Some(d) => std::thread::park_timeout(d),
        }
        self.step = self.step.saturating_add(1);
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.post(peer, tag, buf);
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalRecv {
        LocalRecv {
            key: (peer, self.rank, tag),
            shared: Arc::clone(&self.shared),
        }
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        let n = send.len();
        let tag = COLLECTIVE_TAG.as_u16();
        for peer in 0..self.size() {
            self.post(peer, tag, send);
        }
        for peer in 0..self.size() {
            let h = self.irecv(peer, tag, &mut []);
            if let Some(data) = h.wait() {
                let len = data.len().min(n);
                recv[peer * n..peer * n + len].copy_from_slice(&data[..len]);
            }
        }
        // a second collective must not overtake this one in the mailbox
        self.barrier();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::mesh_error::{CommError, DgMeshError};
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::rc::Rc;

    /// MPI world communicator. Receives probe the matched message for its size
    /// before allocating, so the expected length passed to `irecv` is a hint.
    pub struct MpiComm {
        world: Rc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, DgMeshError> {
            let universe = mpi::initialize().ok_or_else(|| DgMeshError::CommError {
                neighbor: 0,
                source: CommError::from("MPI already initialized"),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Rc::new(world),
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending non-blocking send owning its leaked buffer until completion.
    pub struct MpiSend {
        request: Request<'static, [u8], StaticScope>,
        buffer: *mut [u8],
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            self.request.wait();
            // SAFETY: the request completed, MPI no longer reads the buffer
            // and it was produced by `Box::leak` in `isend`.
            drop(unsafe { Box::from_raw(self.buffer) });
            None
        }
    }

    /// Deferred receive: probe then receive on `wait`.
    pub struct MpiRecv {
        world: Rc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (msg, _status) = self
                .world
                .process_at_rank(self.peer)
                .matched_probe_with_tag(self.tag);
            let (data, _status) = msg.matched_receive_vec::<u8>();
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let buffer: *mut [u8] = leaked;
            // SAFETY: `buffer` stays alive until `MpiSend::wait` frees it.
            let data: &'static [u8] = unsafe { &*buffer };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            MpiSend { request, buffer }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecv {
            MpiRecv {
                world: Rc::clone(&self.world),
                peer: peer as i32,
                tag: i32::from(tag),
            }
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) {
            self.world.all_gather_into(send, recv);
        }

        fn abort(&self, code: i32) -> ! {
            self.world.abort(code)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let comms = LocalComm::cluster(2);
        let (c0, c1) = (comms[0].clone(), comms[1].clone());

        let mut recv_buf = [0u8; 4];
        let recv_handle = c1.irecv(0, 7, &mut recv_buf);
        c0.isend(1, 7, &[1, 2, 3, 4]).wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn messages_with_same_tag_are_fifo() {
        let comms = LocalComm::cluster(2);
        comms[0].isend(1, 3, &[1]);
        comms[0].isend(1, 3, &[2]);
        assert_eq!(comms[1].irecv(0, 3, &mut []).wait(), Some(vec![1]));
        assert_eq!(comms[1].irecv(0, 3, &mut []).wait(), Some(vec![2]));
    }

    #[test]
    fn allgather_is_rank_ordered() {
        let comms = LocalComm::cluster(3);
        let results: Vec<Vec<u8>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let mine = [c.rank() as u8, 10 + c.rank() as u8];
                        let mut all = vec![0u8; 6];
                        c.allgather(&mine, &mut all);
                        all
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for r in results {
            assert_eq!(r, vec![0, 10, 1, 11, 2, 12]);
        }
    }

    #[test]
    fn idle_receive_backs_off_to_bounded_parks() {
        let mut b = Backoff::default();
        for _ in 0..Backoff::YIELDS {
            assert_eq!(b.park_time(), None);
            b.snooze();
        }
        assert_eq!(b.park_time(), Some(Duration::from_micros(1)));
        for _ in 0..40 {
            b.snooze();
        }
        assert_eq!(b.park_time(), Some(Backoff::MAX_PARK));
    }

    #[test]
    fn late_send_reaches_a_waiting_receive() {
        let comms = LocalComm::cluster(2);
        let got = std::thread::scope(|s| {
            let recv = s.spawn(|| comms[1].irecv(0, 5, &mut []).wait());
            std::thread::sleep(Duration::from_millis(20));
            comms[0].isend(1, 5, &[42]);
            recv.join().unwrap()
        });
        assert_eq!(got, Some(vec![42]));
    }

    #[test]
    fn nocomm_is_single_rank() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        let mut out = [0u8; 2];
        c.allgather(&[5, 6], &mut out);
        assert_eq!(out, [5, 6]);
        assert!(c.irecv(0, 1, &mut out).wait().is_none());
    }

    #[test]
    fn tags_offset() {
        let t = CommTag::new(0xD000);
        assert_eq!(t.offset(3).as_u16(), 0xD003);
    }
}
