//! Rank-local registry of standard elements and faces.
//!
//! Entries are found by structural equality of their key with a linear scan;
//! the number of distinct keys is bounded by the distinct shape/degree
//! combinations of the mesh, not by its size. Entries are append-only and
//! addressed by their index, which elements and faces store.

use crate::algs::linalg::LinearAlgebra;
use crate::discretization::standard_element::{FaceKey, StandardElement, StandardFace, VolumeKey};
use crate::mesh_error::DgMeshError;

#[derive(Clone, Debug, Default)]
pub struct StandardElementCache {
    volumes: Vec<StandardElement>,
    faces: Vec<StandardFace>,
}

impl StandardElementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the volume standard element for `key`, created on first use.
    pub fn volume_index(
        &mut self,
        key: VolumeKey,
        la: &dyn LinearAlgebra,
    ) -> Result<usize, DgMeshError> {
        if let Some(i) = self.volumes.iter().position(|v| v.key == key) {
            return Ok(i);
        }
        self.volumes.push(StandardElement::new(key, la)?);
        log::debug!("new standard element {key:?}");
        Ok(self.volumes.len() - 1)
    }

    /// Index of the standard face for `key`, created on first use.
    pub fn face_index(
        &mut self,
        key: FaceKey,
        la: &dyn LinearAlgebra,
    ) -> Result<usize, DgMeshError> {
        if let Some(i) = self.faces.iter().position(|f| f.key == key) {
            return Ok(i);
        }
        self.faces.push(StandardFace::new(key, la)?);
        log::debug!("new standard face {key:?}");
        Ok(self.faces.len() - 1)
    }

    pub fn volume(&self, i: usize) -> &StandardElement {
        &self.volumes[i]
    }

    pub fn face(&self, i: usize) -> &StandardFace {
        &self.faces[i]
    }

    pub fn volumes(&self) -> &[StandardElement] {
        &self.volumes
    }

    pub fn faces(&self) -> &[StandardFace] {
        &self.faces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::linalg::ReferenceLinearAlgebra;
    use crate::topology::cell_type::CellType;

    #[test]
    fn equal_keys_share_one_entry() {
        let mut cache = StandardElementCache::new();
        let key = VolumeKey {
            shape: CellType::Quadrilateral,
            degree: 2,
            jac_const: true,
            order_exact: 4,
        };
        let a = cache.volume_index(key, &ReferenceLinearAlgebra).unwrap();
        let b = cache.volume_index(key, &ReferenceLinearAlgebra).unwrap();
        assert_eq!(a, b);
        let c = cache
            .volume_index(
                VolumeKey {
                    jac_const: false,
                    order_exact: 6,
                    ..key
                },
                &ReferenceLinearAlgebra,
            )
            .unwrap();
        assert_ne!(a, c);
        assert_eq!(cache.volumes().len(), 2);
        assert_eq!(cache.volume(a).n_dofs(), 9);
    }
}
