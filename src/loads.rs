//! Equivalent nodal loads.
//!
//! Each descriptor resolves its region to nodes, then contributes to a
//! `LoadDelta`: a load vector over all DOFs plus, for convection and grounded
//! springs, stiffness triplets that the caller folds back into the global
//! matrix. Deltas of several descriptors add up.

use std::collections::HashMap;

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::{
    assembly::{dof_index, total_dofs, TripletAccumulator},
    datatypes::{Element, Model},
    element::ElementFormulation,
    error::{FeaError, Result},
    quadrature::QuadratureRule,
    region::{NodeMask, Region},
    shape::{metric_factor, Shape},
};

/// Gauss order used on edges and faces; exact for N^T N of linear facets
pub const FACET_QUADRATURE_ORDER: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LoadKind {
    /// Force or heat added once to every selected node
    Nodal { value: f64 },
    /// Traction or flux per unit length (planar) or area (solid)
    Edge { value: f64 },
    /// Load per unit volume over elements lying entirely in the region
    Body { value: f64 },
    /// Film coefficient `h` and ambient temperature on boundary facets
    Convection { film: f64, ambient: f64 },
    /// Grounded spring on every selected node
    Spring { stiffness: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadDescriptor {
    pub name: String,
    pub kind: LoadKind,
    pub dof: String,
    pub region: Region,
    /// Fail instead of warning when the region selects nothing
    pub required: bool,
}

impl LoadDescriptor {
    pub fn new(name: &str, kind: LoadKind, dof: &str, region: Region) -> LoadDescriptor {
        LoadDescriptor {
            name: name.to_owned(),
            kind,
            dof: dof.to_owned(),
            region,
            required: false,
        }
    }

    pub fn required(mut self) -> LoadDescriptor {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadDelta {
    pub vector: DVector<f64>,
    pub matrix: TripletAccumulator,
}

impl LoadDelta {
    pub fn zeros(total_dofs: usize) -> LoadDelta {
        LoadDelta {
            vector: DVector::zeros(total_dofs),
            matrix: TripletAccumulator::new(),
        }
    }

    pub fn accumulate(&mut self, other: LoadDelta) {
        self.vector += other.vector;
        self.matrix.merge(other.matrix);
    }
}

/// A boundary facet of one element, with global node ids
#[derive(Debug, Clone)]
struct Facet {
    element: usize,
    shape: Shape,
    nodes: Vec<usize>,
    factor: f64,
}

pub struct LoadIntegrator<'a> {
    model: &'a Model,
    formulation: &'a ElementFormulation,
}

impl<'a> LoadIntegrator<'a> {
    pub fn new(model: &'a Model, formulation: &'a ElementFormulation) -> LoadIntegrator<'a> {
        LoadIntegrator { model, formulation }
    }

    pub fn total_dofs(&self) -> usize {
        total_dofs(&self.model.mesh, self.formulation.node_dofs())
    }

    fn local_dof(&self, load: &LoadDescriptor) -> Result<usize> {
        self.formulation.kind.dof_index(&load.dof).ok_or_else(|| {
            FeaError::Input(format!(
                "Load '{}' targets DOF '{}' which {} elements do not have",
                load.name,
                load.dof,
                self.formulation.kind.key()
            ))
        })
    }

    pub fn integrate(&self, load: &LoadDescriptor) -> Result<LoadDelta> {
        let node_dofs = self.formulation.node_dofs();
        let local = self.local_dof(load)?;
        let mut delta = LoadDelta::zeros(self.total_dofs());

        let owner = format!("load '{}'", load.name);
        let nodes = load.region.resolve(&self.model.mesh, &owner, load.required)?;
        if nodes.is_empty() {
            return Ok(delta);
        }
        let mask = NodeMask::from_nodes(&self.model.mesh, &nodes)?;

        match load.kind {
            LoadKind::Nodal { value } => {
                for id in &nodes {
                    delta.vector[dof_index(*id, local, node_dofs)] += value;
                }
            }
            LoadKind::Spring { stiffness } => {
                for id in &nodes {
                    let dof = dof_index(*id, local, node_dofs);
                    delta.matrix.push(dof, dof, stiffness);
                }
            }
            LoadKind::Edge { value } => {
                for facet in self.selected_facets(&mask)? {
                    let (integral, _) = self.facet_integrals(&facet)?;
                    for (a, id) in facet.nodes.iter().enumerate() {
                        delta.vector[dof_index(*id, local, node_dofs)] +=
                            value * integral[a] * facet.factor;
                    }
                }
            }
            LoadKind::Convection { film, ambient } => {
                if !self.formulation.kind.is_thermal() {
                    return Err(FeaError::Input(format!(
                        "Convection '{}' needs a thermal element kind",
                        load.name
                    )));
                }
                for facet in self.selected_facets(&mask)? {
                    let (integral, product) = self.facet_integrals(&facet)?;
                    for (a, row) in facet.nodes.iter().enumerate() {
                        let i = dof_index(*row, local, node_dofs);
                        delta.vector[i] += film * ambient * integral[a] * facet.factor;
                        for (b, col) in facet.nodes.iter().enumerate() {
                            let j = dof_index(*col, local, node_dofs);
                            delta.matrix.push(i, j, film * product[(a, b)] * facet.factor);
                        }
                    }
                }
            }
            LoadKind::Body { value } => {
                let mut count = 0;
                for element in self.elements()? {
                    if !mask.contains_all(&element.nodes) {
                        continue;
                    }
                    let integral = self.body_integral(element)?;
                    for (a, id) in element.nodes.iter().enumerate() {
                        delta.vector[dof_index(*id, local, node_dofs)] += value * integral[a];
                    }
                    count += 1;
                }
                debug!("{owner} loads {count} elements");
            }
        }

        Ok(delta)
    }

    /// Sum of the deltas of every descriptor, in order
    pub fn integrate_all(&self, loads: &[LoadDescriptor]) -> Result<LoadDelta> {
        let mut total = LoadDelta::zeros(self.total_dofs());
        for load in loads {
            total.accumulate(self.integrate(load)?);
        }
        Ok(total)
    }

    /// Mesh elements, after checking their incidence rows
    fn elements(&self) -> Result<&'a [Element]> {
        let model: &'a Model = self.model;
        let mesh = &model.mesh;
        for element in &mesh.elements {
            self.formulation.check_element(element)?;
            if let Some(id) = element.nodes.iter().find(|id| mesh.node(**id).is_none()) {
                return Err(FeaError::Input(format!(
                    "Element {} references node {id} which is not in the mesh",
                    element.id
                )));
            }
        }
        Ok(&mesh.elements)
    }

    /// Boundary facets whose nodes are all selected. Facets shared by two
    /// elements are interior and never loaded; partially selected facets
    /// contribute nothing.
    fn selected_facets(&self, mask: &NodeMask) -> Result<Vec<Facet>> {
        let shape = self.formulation.shape;
        let elements = self.elements()?;

        // A line element is loaded along its own length
        let Some(facet_shape) = shape.facet_shape() else {
            let mut facets = Vec::new();
            for element in elements {
                if mask.contains_all(&element.nodes) {
                    facets.push(Facet {
                        element: element.id,
                        shape,
                        nodes: element.nodes.clone(),
                        factor: 1.0,
                    });
                }
            }
            return Ok(facets);
        };

        let key = |element: &Element, local: &[usize]| -> Vec<usize> {
            let mut key: Vec<usize> = local.iter().map(|i| element.nodes[*i]).collect();
            key.sort_unstable();
            key
        };
        let mut occurrences: HashMap<Vec<usize>, usize> = HashMap::new();
        for element in elements {
            for local in shape.facets() {
                *occurrences.entry(key(element, local)).or_insert(0) += 1;
            }
        }

        let mut facets = Vec::new();
        let mut partial = 0;
        for element in elements {
            let factor = if self.formulation.kind.is_planar() {
                self.formulation.geometry_factor(self.model, element)?
            } else {
                1.0
            };
            for local in shape.facets() {
                let nodes: Vec<usize> = local.iter().map(|i| element.nodes[*i]).collect();
                let selected = nodes.iter().filter(|id| mask.contains(**id)).count();
                if selected == 0 {
                    continue;
                }
                if selected < nodes.len() {
                    partial += 1;
                    continue;
                }
                if occurrences.get(&key(element, local)).copied().unwrap_or(0) > 1 {
                    continue;
                }
                facets.push(Facet {
                    element: element.id,
                    shape: facet_shape,
                    nodes,
                    factor,
                });
            }
        }
        if partial > 0 {
            debug!("skipped {partial} partially selected facets");
        }
        Ok(facets)
    }

    /// Returns (∫N, ∫NᵀN) over a facet in physical measure
    fn facet_integrals(&self, facet: &Facet) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let coords = self.coords(&facet.nodes)?;
        let rule = QuadratureRule::new(facet.shape, FACET_QUADRATURE_ORDER)?;
        let n_nodes = facet.nodes.len();
        let mut integral = DVector::zeros(n_nodes);
        let mut product = DMatrix::zeros(n_nodes, n_nodes);
        for point in &rule.points {
            let scale = metric_factor(facet.shape, &point.coords, &coords)
                .map_err(|e| e.in_element(facet.element))?
                * point.weight;
            let n = facet.shape.values(&point.coords);
            integral += &n * scale;
            product += (&n * n.transpose()) * scale;
        }
        Ok((integral, product))
    }

    /// ∫N times the geometry factor over a whole element, using the
    /// stiffness quadrature rule
    fn body_integral(&self, element: &Element) -> Result<DVector<f64>> {
        let shape = self.formulation.shape;
        let coords = self.model.mesh.element_coords(element)?;
        let factor = self.formulation.geometry_factor(self.model, element)?;
        let mut integral = DVector::zeros(shape.num_nodes());
        for point in &self.formulation.rule.points {
            let measure = match shape.dim() {
                1 => metric_factor(shape, &point.coords, &coords),
                _ => shape
                    .evaluate(&point.coords, &coords)
                    .map(|eval| eval.determinant),
            };
            let measure = measure.map_err(|e| e.in_element(element.id))?;
            integral += shape.values(&point.coords) * (measure * factor * point.weight);
        }
        Ok(integral)
    }

    fn coords(&self, nodes: &[usize]) -> Result<DMatrix<f64>> {
        let mut coords = DMatrix::zeros(nodes.len(), 3);
        for (row, id) in nodes.iter().enumerate() {
            let node = self
                .model
                .mesh
                .node(*id)
                .ok_or_else(|| FeaError::Input(format!("Load references missing node {id}")))?;
            coords[(row, 0)] = node.vertex.x;
            coords[(row, 1)] = node.vertex.y;
            coords[(row, 2)] = node.vertex.z;
        }
        Ok(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Mesh, Node, PropertyRecord, PropertyTable};
    use crate::element::ElementKind;
    use crate::region::BoundingBox;
    use approx::assert_relative_eq;

    /// 2x1 strip of unit quads, thickness 0.5
    fn strip(kind: ElementKind) -> (Model, ElementFormulation) {
        let nodes = vec![
            Node::new(1, 0.0, 0.0, 0.0),
            Node::new(2, 1.0, 0.0, 0.0),
            Node::new(3, 2.0, 0.0, 0.0),
            Node::new(4, 0.0, 1.0, 0.0),
            Node::new(5, 1.0, 1.0, 0.0),
            Node::new(6, 2.0, 1.0, 0.0),
        ];
        let elements = vec![
            Element::new(1, 0, 1, 1, vec![1, 2, 5, 4]),
            Element::new(2, 0, 1, 1, vec![2, 3, 6, 5]),
        ];
        let mut materials = PropertyTable::new();
        materials.insert(
            1,
            PropertyRecord::new()
                .with("EXX", 100.0)
                .with("VXY", 0.25)
                .with("KXX", 1.0),
        );
        let mut geometries = PropertyTable::new();
        geometries.insert(1, PropertyRecord::new().with("THICKN", 0.5));
        let model = Model::new(Mesh::new(nodes, elements), materials, geometries);
        let formulation = ElementFormulation::new(
            kind,
            Shape::Quad4,
            kind.default_material(),
            2,
            &model.materials,
        )
        .unwrap();
        (model, formulation)
    }

    fn right_edge() -> Region {
        Region::Box(BoundingBox {
            x_min: 2.0,
            ..Default::default()
        })
    }

    #[test]
    fn nodal_load_targets_named_dof() {
        let (model, f) = strip(ElementKind::Plane);
        let load = LoadDescriptor::new("tip", LoadKind::Nodal { value: 3.0 }, "fy", right_edge());
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        assert_eq!(delta.vector[dof_index(3, 1, 2)], 3.0);
        assert_eq!(delta.vector[dof_index(6, 1, 2)], 3.0);
        assert_eq!(delta.vector.sum(), 6.0);
        assert!(delta.matrix.is_empty());
    }

    #[test]
    fn edge_traction_is_split_between_edge_nodes() {
        let (model, f) = strip(ElementKind::Plane);
        let load = LoadDescriptor::new("pull", LoadKind::Edge { value: 10.0 }, "ux", right_edge());
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        // 10 per unit area * edge length 1 * thickness 0.5, half to each node
        assert_relative_eq!(delta.vector[dof_index(3, 0, 2)], 2.5, max_relative = 1e-12);
        assert_relative_eq!(delta.vector[dof_index(6, 0, 2)], 2.5, max_relative = 1e-12);
        assert_relative_eq!(delta.vector.sum(), 5.0, max_relative = 1e-12);
    }

    #[test]
    fn interior_edges_are_not_loaded() {
        let (model, f) = strip(ElementKind::Plane);
        let middle = Region::Box(BoundingBox {
            x_min: 1.0,
            x_max: 1.0,
            ..Default::default()
        });
        let load = LoadDescriptor::new("inner", LoadKind::Edge { value: 10.0 }, "ux", middle);
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        assert_eq!(delta.vector.amax(), 0.0);
    }

    #[test]
    fn single_selected_node_is_a_quiet_no_op() {
        let (model, f) = strip(ElementKind::Plane);
        let load = LoadDescriptor::new(
            "corner",
            LoadKind::Edge { value: 10.0 },
            "ux",
            Region::Nodes(vec![3]),
        );
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        assert_eq!(delta.vector.amax(), 0.0);
    }

    #[test]
    fn body_load_integrates_over_volume() {
        let (model, f) = strip(ElementKind::Plane);
        let load =
            LoadDescriptor::new("gravity", LoadKind::Body { value: -2.0 }, "uy", Region::All);
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        // area 2 * thickness 0.5 * -2
        assert_relative_eq!(delta.vector.sum(), -2.0, max_relative = 1e-12);
        assert_relative_eq!(delta.vector[dof_index(2, 1, 2)], -0.5, max_relative = 1e-12);
    }

    #[test]
    fn convection_returns_load_and_matrix() {
        let (model, f) = strip(ElementKind::HeatPlane);
        let load = LoadDescriptor::new(
            "film",
            LoadKind::Convection {
                film: 4.0,
                ambient: 20.0,
            },
            "convection",
            right_edge(),
        );
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        // h T_inf L t / 2 per node
        assert_relative_eq!(delta.vector[2], 4.0 * 20.0 * 0.5 / 2.0, max_relative = 1e-12);
        let m = DMatrix::from(&delta.matrix.to_csr(6).unwrap());
        // h t L / 6 * [[2, 1], [1, 2]]
        assert_relative_eq!(m[(2, 2)], 4.0 * 0.5 * 2.0 / 6.0, max_relative = 1e-12);
        assert_relative_eq!(m[(2, 5)], 4.0 * 0.5 / 6.0, max_relative = 1e-12);
        assert_relative_eq!(m.sum(), 4.0 * 0.5, max_relative = 1e-12);
    }

    #[test]
    fn convection_on_structural_kind_is_rejected() {
        let (model, f) = strip(ElementKind::Plane);
        let load = LoadDescriptor::new(
            "film",
            LoadKind::Convection {
                film: 1.0,
                ambient: 0.0,
            },
            "ux",
            right_edge(),
        );
        assert!(LoadIntegrator::new(&model, &f).integrate(&load).is_err());
    }

    #[test]
    fn unvalidated_meshes_fail_cleanly() {
        let (mut model, f) = strip(ElementKind::Plane);
        model.mesh.elements[1].nodes[1] = 9;
        for kind in [LoadKind::Edge { value: 1.0 }, LoadKind::Body { value: 1.0 }] {
            let load = LoadDescriptor::new("bad", kind, "fx", Region::All);
            let err = LoadIntegrator::new(&model, &f).integrate(&load).unwrap_err();
            assert!(matches!(err, FeaError::Input(message) if message.contains("node 9")));
        }

        let (mut model, f) = strip(ElementKind::Plane);
        model.mesh.nodes[5].id = 60;
        let load = LoadDescriptor::new("tip", LoadKind::Nodal { value: 1.0 }, "fx", right_edge());
        let err = LoadIntegrator::new(&model, &f).integrate(&load).unwrap_err();
        assert!(matches!(err, FeaError::Input(_)));
    }

    #[test]
    fn grounded_spring_is_a_matrix_delta() {
        let (model, f) = strip(ElementKind::Plane);
        let load = LoadDescriptor::new(
            "support",
            LoadKind::Spring { stiffness: 7.0 },
            "ux",
            Region::Nodes(vec![1]),
        );
        let delta = LoadIntegrator::new(&model, &f).integrate(&load).unwrap();
        assert_eq!(delta.vector.amax(), 0.0);
        assert_eq!(delta.matrix.iter().collect::<Vec<_>>(), vec![(0, 0, 7.0)]);
    }

    #[test]
    fn loads_superpose() {
        let (model, f) = strip(ElementKind::Plane);
        let integrator = LoadIntegrator::new(&model, &f);
        let a = LoadDescriptor::new("a", LoadKind::Edge { value: 10.0 }, "ux", right_edge());
        let b = LoadDescriptor::new("b", LoadKind::Body { value: 1.5 }, "uy", Region::All);
        let separate =
            integrator.integrate(&a).unwrap().vector + integrator.integrate(&b).unwrap().vector;
        let combined = integrator.integrate_all(&[a, b]).unwrap().vector;
        assert_relative_eq!(separate, combined, epsilon = 1e-14);
    }

    #[test]
    fn required_empty_region_fails() {
        let (model, f) = strip(ElementKind::Plane);
        let nowhere = Region::Box(BoundingBox {
            x_min: 10.0,
            ..Default::default()
        });
        let load =
            LoadDescriptor::new("lost", LoadKind::Nodal { value: 1.0 }, "ux", nowhere).required();
        let err = LoadIntegrator::new(&model, &f).integrate(&load).unwrap_err();
        assert!(matches!(err, FeaError::UnresolvedRegion(_)));
    }

    #[test]
    fn unknown_dof_is_an_input_error() {
        let (model, f) = strip(ElementKind::Plane);
        let load = LoadDescriptor::new("z", LoadKind::Nodal { value: 1.0 }, "fz", Region::All);
        assert!(matches!(
            LoadIntegrator::new(&model, &f).integrate(&load),
            Err(FeaError::Input(_))
        ));
    }
}
