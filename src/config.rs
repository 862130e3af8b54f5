//! Run parameters consumed by the mesh builder.
//!
//! The host application owns parsing; any serde format works.

use crate::mesh_error::DgMeshError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Time integration mode, which decides the mass matrix variants to build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeMarching {
    #[default]
    Steady,
    /// Steady run in a rotating frame of reference.
    SteadyRotatingFrame,
    RungeKuttaExplicit,
    DualTimeStepping1st,
    DualTimeStepping2nd,
    TimeSpectral,
}

/// Mass matrix variants stored per owned element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MassMatrixKinds {
    pub full: bool,
    pub full_inverse: bool,
    pub lumped: bool,
}

impl TimeMarching {
    pub fn mass_matrix_kinds(self) -> MassMatrixKinds {
        match self {
            TimeMarching::Steady | TimeMarching::SteadyRotatingFrame => MassMatrixKinds {
                full: false,
                full_inverse: false,
                lumped: true,
            },
            TimeMarching::DualTimeStepping1st
            | TimeMarching::DualTimeStepping2nd
            | TimeMarching::TimeSpectral => MassMatrixKinds {
                full: true,
                full_inverse: false,
                lumped: true,
            },
            TimeMarching::RungeKuttaExplicit => MassMatrixKinds {
                full: false,
                full_inverse: true,
                lumped: false,
            },
        }
    }
}

/// Rigid transform from the donor side of a periodic marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodicMarkerConfig {
    /// Index of the marker in the mesh's marker list.
    pub tag: u16,
    #[serde(default)]
    pub center: [f64; 3],
    /// Rotation angles in radians about x, y and z, applied in that order.
    #[serde(default)]
    pub angles: [f64; 3],
    #[serde(default)]
    pub translation: [f64; 3],
}

impl PeriodicMarkerConfig {
    pub fn translation_only(tag: u16, translation: [f64; 3]) -> Self {
        Self {
            tag,
            center: [0.0; 3],
            angles: [0.0; 3],
            translation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DgMeshConfig {
    pub time_marching: TimeMarching,
    /// Integration exactness is `ceil(factor * p)` for constant-Jacobian elements.
    pub quadrature_factor_straight: f64,
    /// Same for curved elements.
    pub quadrature_factor_curved: f64,
    pub periodic: Vec<PeriodicMarkerConfig>,
    /// Fraction of the local surface length scale used to match periodic points.
    pub point_tolerance_factor: f64,
    /// Periodic markers rotating by more than this (radians) are rotational.
    pub rotational_angle_threshold: f64,
}

impl Default for DgMeshConfig {
    fn default() -> Self {
        Self {
            time_marching: TimeMarching::Steady,
            quadrature_factor_straight: 2.0,
            quadrature_factor_curved: 3.0,
            periodic: Vec::new(),
            point_tolerance_factor: 1e-4,
            rotational_angle_threshold: 1e-5,
        }
    }
}

impl DgMeshConfig {
    pub fn validate(&self) -> Result<(), DgMeshError> {
        let positive = [
            ("quadrature_factor_straight", self.quadrature_factor_straight),
            ("quadrature_factor_curved", self.quadrature_factor_curved),
            ("point_tolerance_factor", self.point_tolerance_factor),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(DgMeshError::InvalidConfig(format!(
                    "{name} must be positive, got {v}"
                )));
            }
        }
        if !(self.rotational_angle_threshold >= 0.0) {
            return Err(DgMeshError::InvalidConfig(format!(
                "rotational_angle_threshold must be non-negative, got {}",
                self.rotational_angle_threshold
            )));
        }
        let mut seen = BTreeSet::new();
        for per in &self.periodic {
            if !seen.insert(per.tag) {
                return Err(DgMeshError::InvalidConfig(format!(
                    "periodic marker {} configured twice",
                    per.tag
                )));
            }
        }
        Ok(())
    }

    /// Exactness of the quadrature for a degree-`p` element.
    pub fn order_exact(&self, p: usize, jac_const: bool) -> usize {
        let factor = if jac_const {
            self.quadrature_factor_straight
        } else {
            self.quadrature_factor_curved
        };
        (factor * p as f64).ceil() as usize
    }

    pub fn periodic_marker(&self, tag: u16) -> Option<&PeriodicMarkerConfig> {
        self.periodic.iter().find(|p| p.tag == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = DgMeshConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.order_exact(2, true), 4);
        assert_eq!(cfg.order_exact(2, false), 6);
        assert_eq!(cfg.order_exact(0, false), 0);
    }

    #[test]
    fn duplicate_periodic_tag_is_rejected() {
        let cfg = DgMeshConfig {
            periodic: vec![
                PeriodicMarkerConfig::translation_only(1, [1.0, 0.0, 0.0]),
                PeriodicMarkerConfig::translation_only(1, [-1.0, 0.0, 0.0]),
            ],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DgMeshError::InvalidConfig(_))));
    }

    #[test]
    fn negative_factor_is_rejected() {
        let cfg = DgMeshConfig {
            quadrature_factor_curved: -1.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DgMeshError::InvalidConfig(_))));
    }

    #[test]
    fn mass_kinds_follow_time_marching() {
        let k = TimeMarching::Steady.mass_matrix_kinds();
        assert!(k.lumped && !k.full && !k.full_inverse);
        assert_eq!(TimeMarching::SteadyRotatingFrame.mass_matrix_kinds(), k);
        let k = TimeMarching::TimeSpectral.mass_matrix_kinds();
        assert!(k.lumped && k.full && !k.full_inverse);
        let k = TimeMarching::RungeKuttaExplicit.mass_matrix_kinds();
        assert!(!k.lumped && !k.full && k.full_inverse);
    }
}
