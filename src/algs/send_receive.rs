//! Halo DOF exchange pattern.
//!
//! Every halo element is received from the rank owning it after
//! distribution. Each rank tells the owners which elements it holds as
//! halos, in local halo order, and the owners answer with the matching list
//! of owned solution DOFs to send. Periodic halos owned by the rank itself
//! produce a self entry.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::distribute::DistributedMesh;
use crate::algs::exchange::sparse_exchange;
use crate::algs::wire::{WireHaloRequest, WireReader, WireWriter, kind};
use crate::config::DgMeshConfig;
use crate::mesh_error::DgMeshError;
use crate::topology::periodic::PeriodicTransform;
use itertools::Itertools;
use std::collections::BTreeMap;

const DOF_REQUEST_TAG: CommTag = CommTag::new(0x4408);

/// Per peer rank, the local solution DOFs to send and to receive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HaloExchangePattern {
    /// Communication ranks in increasing order.
    pub ranks: Vec<usize>,
    /// Owned DOFs sent to `ranks[i]`.
    pub send: Vec<Vec<usize>>,
    /// Halo DOFs received from `ranks[i]`.
    pub recv: Vec<Vec<usize>>,
    /// Periodic markers with a rotational transform.
    pub rotational_markers: Vec<u16>,
    /// Local halo elements imported through each rotational marker.
    pub rotational_halos: Vec<Vec<usize>>,
}

impl HaloExchangePattern {
    pub fn build<C: Communicator>(
        comm: &C,
        mesh: &DistributedMesh,
        config: &DgMeshConfig,
    ) -> Result<Self, DgMeshError> {
        let mut recv: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut requests: BTreeMap<usize, WireWriter> = BTreeMap::new();
        for e in &mesh.elements[mesh.n_owned..] {
            recv.entry(e.rank_original).or_default().extend(e.sol_dofs());
            let w = requests
                .entry(e.rank_original)
                .or_insert_with(|| WireWriter::new(kind::DOF_REQUEST));
            w.put(&WireHaloRequest::new(e.global_id, e.periodic));
            w.end_record();
        }
        let outgoing: BTreeMap<usize, Vec<u8>> =
            requests.into_iter().map(|(r, w)| (r, w.finish())).collect();
        let incoming = sparse_exchange(comm, DOF_REQUEST_TAG, &outgoing)?;

        let mut send: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (&peer, buf) in &incoming {
            let mut r = WireReader::new(buf, kind::DOF_REQUEST)?;
            let dofs = send.entry(peer).or_default();
            for _ in 0..r.count() {
                let req: WireHaloRequest = r.get()?;
                let local = mesh.owned_map.get(&req.global_id()).ok_or_else(|| {
                    DgMeshError::MeshInconsistency(format!(
                        "rank {peer} expects element {} from rank {}, which does not own it",
                        req.global_id(),
                        comm.rank()
                    ))
                })?;
                dofs.extend(mesh.elements[*local].sol_dofs());
            }
            r.finish()?;
        }

        let ranks: Vec<usize> = recv.keys().chain(send.keys()).copied().sorted().dedup().collect();
        let send: Vec<Vec<usize>> = ranks
            .iter()
            .map(|r| send.remove(r).unwrap_or_default())
            .collect();
        let recv: Vec<Vec<usize>> = ranks
            .iter()
            .map(|r| recv.remove(r).unwrap_or_default())
            .collect();

        let mut rotational_markers = Vec::new();
        let mut rotational_halos = Vec::new();
        for per in &config.periodic {
            let transform = PeriodicTransform::from_config(per);
            if !transform.is_rotational(config.rotational_angle_threshold) {
                continue;
            }
            rotational_markers.push(per.tag);
            rotational_halos.push(
                (mesh.n_owned..mesh.elements.len())
                    .filter(|&i| mesh.elements[i].periodic == Some(per.tag))
                    .collect(),
            );
        }

        log::info!(
            "rank {}: halo exchange with {} ranks, {} DOFs sent, {} received, {} rotational markers",
            comm.rank(),
            ranks.len(),
            send.iter().map(Vec::len).sum::<usize>(),
            recv.iter().map(Vec::len).sum::<usize>(),
            rotational_markers.len()
        );
        Ok(Self {
            ranks,
            send,
            recv,
            rotational_markers,
            rotational_halos,
        })
    }

    pub fn n_ranks(&self) -> usize {
        self.ranks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::distribute::MeshDistributor;
    use crate::mesh_generation::{MeshGenerationOptions, Periodicity, quad_mesh};

    fn strip(periodic: bool) -> (DistributedMesh, DgMeshConfig) {
        let opts = MeshGenerationOptions {
            periodic: Periodicity {
                x: periodic,
                ..Periodicity::none()
            },
            ..Default::default()
        };
        let g = quad_mesh(2, 1, [0.0, 0.0], [2.0, 1.0], opts).unwrap();
        let cfg = DgMeshConfig {
            periodic: g.periodic.clone(),
            ..Default::default()
        };
        let mesh = MeshDistributor::new(&NoComm, &cfg).distribute(&g.mesh).unwrap();
        (mesh, cfg)
    }

    #[test]
    fn no_halos_no_ranks() {
        let (mesh, cfg) = strip(false);
        let pat = HaloExchangePattern::build(&NoComm, &mesh, &cfg).unwrap();
        assert_eq!(pat.n_ranks(), 0);
        assert!(pat.rotational_markers.is_empty());
    }

    #[test]
    fn periodic_halos_talk_to_self() {
        let (mesh, cfg) = strip(true);
        assert_eq!(mesh.n_halo(), 2);
        let pat = HaloExchangePattern::build(&NoComm, &mesh, &cfg).unwrap();
        assert_eq!(pat.ranks, vec![0]);
        assert_eq!(pat.recv[0].len(), 8);
        assert_eq!(pat.send[0].len(), 8);
        // halos in (global ID, marker) order: element 0 through marker 2, then
        // element 1 through marker 1
        assert_eq!(pat.send[0][..4], [0, 1, 2, 3]);
        assert_eq!(pat.send[0][4..], [4, 5, 6, 7]);
        assert!(pat.recv[0].iter().all(|&d| d >= 8));
    }

    #[test]
    fn rotational_markers_list_their_halos() {
        let (mesh, mut cfg) = strip(true);
        cfg.periodic[0].angles = [0.0, 0.0, 0.1];
        let pat = HaloExchangePattern::build(&NoComm, &mesh, &cfg).unwrap();
        assert_eq!(pat.rotational_markers, vec![cfg.periodic[0].tag]);
        assert_eq!(pat.rotational_halos[0].len(), 1);
        let h = pat.rotational_halos[0][0];
        assert_eq!(mesh.elements[h].periodic, Some(cfg.periodic[0].tag));
    }
}
