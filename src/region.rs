//! Node selection for loads and boundary conditions

use log::warn;
use serde::{Deserialize, Serialize};

use crate::datatypes::{Mesh, Vertex};
use crate::error::{FeaError, Result};

/// Absolute tolerance applied to every bounding-box limit
pub const REGION_TOLERANCE: f64 = 1e-9;

/// Axis-aligned box, inclusive on every side. Missing limits are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        BoundingBox {
            x_min: f64::MIN,
            x_max: f64::MAX,
            y_min: f64::MIN,
            y_max: f64::MAX,
            z_min: f64::MIN,
            z_max: f64::MAX,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, vertex: &Vertex) -> bool {
        let within =
            |v: f64, lo: f64, hi: f64| v >= lo - REGION_TOLERANCE && v <= hi + REGION_TOLERANCE;
        within(vertex.x, self.x_min, self.x_max)
            && within(vertex.y, self.y_min, self.y_max)
            && within(vertex.z, self.z_min, self.z_max)
    }

    /// True when every lower limit is at most its upper limit
    pub fn is_ordered(&self) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max && self.z_min <= self.z_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Region {
    All,
    Box(BoundingBox),
    /// Explicit 1-based node ids
    Nodes(Vec<usize>),
}

impl Region {
    /// Ids of the selected nodes in ascending order. Ids that do not exist in
    /// the mesh are dropped.
    pub fn select(&self, mesh: &Mesh) -> Vec<usize> {
        match self {
            Region::All => mesh.nodes.iter().map(|n| n.id).collect(),
            Region::Box(bounds) => mesh
                .nodes
                .iter()
                .filter(|n| bounds.contains(&n.vertex))
                .map(|n| n.id)
                .collect(),
            Region::Nodes(ids) => {
                let mut ids: Vec<usize> = ids
                    .iter()
                    .copied()
                    .filter(|id| mesh.node(*id).is_some())
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
        }
    }

    /// Explicit ids that `select` drops, in ascending order
    pub fn missing_nodes(&self, mesh: &Mesh) -> Vec<usize> {
        let Region::Nodes(ids) = self else {
            return Vec::new();
        };
        let mut missing: Vec<usize> = ids
            .iter()
            .copied()
            .filter(|id| mesh.node(*id).is_none())
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// Selects nodes for the descriptor `owner`. An empty selection fails
    /// only when the descriptor requires a target.
    pub fn resolve(&self, mesh: &Mesh, owner: &str, required: bool) -> Result<Vec<usize>> {
        let missing = self.missing_nodes(mesh);
        if !missing.is_empty() {
            warn!("{owner} names nodes {missing:?} which are not in the mesh");
        }
        let nodes = self.select(mesh);
        if nodes.is_empty() {
            if required {
                return Err(FeaError::UnresolvedRegion(owner.to_owned()));
            }
            warn!("{owner} selects no nodes and is ignored");
        }
        Ok(nodes)
    }

    /// Selection as a mask over the mesh nodes
    pub fn mask(&self, mesh: &Mesh) -> Result<NodeMask> {
        NodeMask::from_nodes(mesh, &self.select(mesh))
    }
}

/// Node selection indexed by `node id - 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMask {
    selected: Vec<bool>,
}

impl NodeMask {
    /// Fails on ids outside `1..=num_nodes`, which only an unvalidated mesh
    /// can produce.
    pub fn from_nodes(mesh: &Mesh, ids: &[usize]) -> Result<NodeMask> {
        let mut selected = vec![false; mesh.num_nodes()];
        for id in ids {
            match id.checked_sub(1).and_then(|i| selected.get_mut(i)) {
                Some(slot) => *slot = true,
                None => {
                    return Err(FeaError::Input(format!(
                        "Node {id} is outside the mesh of {} nodes",
                        mesh.num_nodes()
                    )))
                }
            }
        }
        Ok(NodeMask { selected })
    }

    pub fn contains(&self, id: usize) -> bool {
        id.checked_sub(1)
            .and_then(|i| self.selected.get(i))
            .copied()
            .unwrap_or(false)
    }

    pub fn contains_all(&self, ids: &[usize]) -> bool {
        ids.iter().all(|id| self.contains(*id))
    }

    pub fn len(&self) -> usize {
        self.selected.iter().filter(|s| **s).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Node;

    fn strip() -> Mesh {
        let nodes = (0..5)
            .map(|i| Node::new(i + 1, i as f64, 0.0, 0.0))
            .collect();
        Mesh::new(nodes, Vec::new())
    }

    #[test]
    fn bounds_are_inclusive() {
        let region = Region::Box(BoundingBox {
            x_min: 1.0,
            x_max: 3.0,
            ..Default::default()
        });
        assert_eq!(region.select(&strip()), vec![2, 3, 4]);
    }

    #[test]
    fn tolerance_catches_rounded_coordinates() {
        let mut mesh = strip();
        mesh.nodes[4].vertex.x = 4.0 - 1e-11;
        let region = Region::Box(BoundingBox {
            x_min: 4.0,
            ..Default::default()
        });
        assert_eq!(region.select(&mesh), vec![5]);
    }

    #[test]
    fn explicit_ids_are_sorted_and_filtered() {
        let region = Region::Nodes(vec![4, 2, 9, 2]);
        assert_eq!(region.select(&strip()), vec![2, 4]);
        assert_eq!(region.missing_nodes(&strip()), vec![9]);
        let mask = region.mask(&strip()).unwrap();
        assert_eq!(mask.len(), 2);
        assert!(mask.contains_all(&[2, 4]));
        assert!(!mask.contains(3));
        assert!(!mask.contains(0));
        assert!(!mask.contains(9));
    }

    #[test]
    fn mistyped_id_among_valid_ones_still_resolves() {
        let region = Region::Nodes(vec![1, 0, 77, 5]);
        assert_eq!(region.missing_nodes(&strip()), vec![0, 77]);
        assert_eq!(region.resolve(&strip(), "bc 'wall'", true).unwrap(), vec![1, 5]);
        assert!(Region::All.missing_nodes(&strip()).is_empty());
    }

    #[test]
    fn mask_rejects_ids_outside_an_unvalidated_mesh() {
        let mut mesh = strip();
        mesh.nodes[4].id = 12;
        let err = Region::All.mask(&mesh).unwrap_err();
        assert!(matches!(err, FeaError::Input(_)));
    }

    #[test]
    fn empty_selection() {
        let region = Region::Box(BoundingBox {
            y_min: 1.0,
            ..Default::default()
        });
        assert!(region.select(&strip()).is_empty());
        assert_eq!(Region::All.select(&strip()).len(), 5);
    }

    #[test]
    fn required_regions_must_match() {
        let region = Region::Nodes(vec![42]);
        assert!(region.resolve(&strip(), "load 'tip'", false).unwrap().is_empty());
        let err = region.resolve(&strip(), "load 'tip'", true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unresolved region error: load 'tip' matches no nodes"
        );
    }
}
