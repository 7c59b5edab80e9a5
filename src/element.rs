//! Element formulation: stiffness, mass and volume of a single element.
//!
//! The element kind is a closed set chosen once per run. `ElementFormulation`
//! bundles that choice with the topology, the quadrature rule and the
//! constitutive tensor of every material tag, and is then handed to the
//! assembler and the load integrator.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::datatypes::{Element, Model, PropertyRecord, PropertyTable};
use crate::error::{FeaError, Result};
use crate::material::{AxialProperty, MaterialModel};
use crate::quadrature::QuadratureRule;
use crate::shape::{Shape, DEGENERATE_TOLERANCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Plane,
    Solid,
    HeatPlane,
    HeatSolid,
    Bar,
    Spring,
}

impl ElementKind {
    pub fn from_key(key: &str) -> Option<ElementKind> {
        match key.to_lowercase().as_str() {
            "plane" => Some(ElementKind::Plane),
            "solid" => Some(ElementKind::Solid),
            "heatplane" => Some(ElementKind::HeatPlane),
            "heatsolid" => Some(ElementKind::HeatSolid),
            "bar" | "truss" => Some(ElementKind::Bar),
            "spring" | "spring21" => Some(ElementKind::Spring),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ElementKind::Plane => "plane",
            ElementKind::Solid => "solid",
            ElementKind::HeatPlane => "heatplane",
            ElementKind::HeatSolid => "heatsolid",
            ElementKind::Bar => "bar",
            ElementKind::Spring => "spring",
        }
    }

    /// Element-type tag used in the incidence table
    pub fn type_tag(&self) -> u32 {
        match self {
            ElementKind::Plane => 22,
            ElementKind::Solid => 23,
            ElementKind::HeatPlane => 32,
            ElementKind::HeatSolid => 33,
            ElementKind::Bar => 11,
            ElementKind::Spring => 110,
        }
    }

    pub fn dof_names(&self) -> &'static [&'static str] {
        match self {
            ElementKind::Plane | ElementKind::Bar | ElementKind::Spring => &["ux", "uy"],
            ElementKind::Solid => &["ux", "uy", "uz"],
            ElementKind::HeatPlane | ElementKind::HeatSolid => &["temp"],
        }
    }

    pub fn node_dofs(&self) -> usize {
        self.dof_names().len()
    }

    /// Local DOF index for a DOF name or one of its load aliases
    pub fn dof_index(&self, name: &str) -> Option<usize> {
        let canonical = match name.to_lowercase().as_str() {
            "ux" | "fx" => "ux",
            "uy" | "fy" => "uy",
            "uz" | "fz" => "uz",
            "temp" | "t" | "heatflux" | "convection" => "temp",
            _ => return None,
        };
        self.dof_names().iter().position(|d| *d == canonical)
    }

    pub fn is_thermal(&self) -> bool {
        matches!(self, ElementKind::HeatPlane | ElementKind::HeatSolid)
    }

    pub fn is_planar(&self) -> bool {
        matches!(self, ElementKind::Plane | ElementKind::HeatPlane)
    }

    pub fn supports(&self, shape: Shape) -> bool {
        match self {
            ElementKind::Plane | ElementKind::HeatPlane => {
                matches!(shape, Shape::Tria3 | Shape::Quad4)
            }
            ElementKind::Solid | ElementKind::HeatSolid => {
                matches!(shape, Shape::Tetr4 | Shape::Hexa8)
            }
            ElementKind::Bar | ElementKind::Spring => shape == Shape::Line2,
        }
    }

    pub fn accepts(&self, material: MaterialModel) -> bool {
        match self {
            ElementKind::Plane => matches!(
                material,
                MaterialModel::PlaneStress
                    | MaterialModel::PlaneStrain
                    | MaterialModel::OrthotropicPlaneStress
            ),
            ElementKind::Solid => {
                matches!(material, MaterialModel::Isotropic | MaterialModel::Orthotropic)
            }
            ElementKind::HeatPlane => material == MaterialModel::Conductivity { dim: 2 },
            ElementKind::HeatSolid => material == MaterialModel::Conductivity { dim: 3 },
            ElementKind::Bar => {
                material
                    == MaterialModel::Axial {
                        property: AxialProperty::Modulus,
                    }
            }
            ElementKind::Spring => {
                material
                    == MaterialModel::Axial {
                        property: AxialProperty::Stiffness,
                    }
            }
        }
    }

    /// Material model used when the input names none
    pub fn default_material(&self) -> MaterialModel {
        match self {
            ElementKind::Plane => MaterialModel::PlaneStress,
            ElementKind::Solid => MaterialModel::Isotropic,
            ElementKind::HeatPlane => MaterialModel::Conductivity { dim: 2 },
            ElementKind::HeatSolid => MaterialModel::Conductivity { dim: 3 },
            ElementKind::Bar => MaterialModel::Axial {
                property: AxialProperty::Modulus,
            },
            ElementKind::Spring => MaterialModel::Axial {
                property: AxialProperty::Stiffness,
            },
        }
    }

    /// Thickness for planar kinds, cross-section area for bars, 1 otherwise
    pub fn geometry_factor(&self, record: &PropertyRecord) -> Result<f64> {
        let name = match self {
            ElementKind::Plane | ElementKind::HeatPlane => "THICKN",
            ElementKind::Bar => "AREA",
            _ => return Ok(1.0),
        };
        match record.get(name) {
            Some(v) if v > 0.0 && v.is_finite() => Ok(v),
            Some(v) => Err(FeaError::Input(format!("{name} must be positive, got {v}"))),
            None => Err(FeaError::Input(format!(
                "{} elements need the {name} geometry property",
                self.key()
            ))),
        }
    }

    fn is_axial(&self) -> bool {
        matches!(self, ElementKind::Bar | ElementKind::Spring)
    }
}

/// Strain-displacement operator (structural) or gradient operator (thermal)
/// from physical shape function derivatives (dim x nodes).
pub fn strain_operator(kind: ElementKind, dndx: &DMatrix<f64>) -> DMatrix<f64> {
    let n = dndx.ncols();
    match kind {
        ElementKind::Plane => {
            let mut b = DMatrix::zeros(3, 2 * n);
            for i in 0..n {
                let (dx, dy) = (dndx[(0, i)], dndx[(1, i)]);
                b[(0, 2 * i)] = dx;
                b[(1, 2 * i + 1)] = dy;
                b[(2, 2 * i)] = dy;
                b[(2, 2 * i + 1)] = dx;
            }
            b
        }
        ElementKind::Solid => {
            let mut b = DMatrix::zeros(6, 3 * n);
            for i in 0..n {
                let (dx, dy, dz) = (dndx[(0, i)], dndx[(1, i)], dndx[(2, i)]);
                let c = 3 * i;
                b[(0, c)] = dx;
                b[(1, c + 1)] = dy;
                b[(2, c + 2)] = dz;
                b[(3, c)] = dy;
                b[(3, c + 1)] = dx;
                b[(4, c + 1)] = dz;
                b[(4, c + 2)] = dy;
                b[(5, c)] = dz;
                b[(5, c + 2)] = dx;
            }
            b
        }
        _ => dndx.clone(),
    }
}

/// Expands shape values into the (node_dofs x nodes*node_dofs) interpolation matrix
pub fn interpolation_matrix(n: &DVector<f64>, node_dofs: usize) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(node_dofs, n.len() * node_dofs);
    for (i, value) in n.iter().enumerate() {
        for d in 0..node_dofs {
            m[(d, i * node_dofs + d)] = *value;
        }
    }
    m
}

/// Direction cosines and length of a two-node element in the xy-plane
pub fn axial_direction(coords: &DMatrix<f64>) -> Result<(f64, f64, f64)> {
    let dx = coords[(1, 0)] - coords[(0, 0)];
    let dy = coords[(1, 1)] - coords[(0, 1)];
    let length = dx.hypot(dy);
    let scale = coords.amax().max(1.0);
    if !length.is_finite() || length <= DEGENERATE_TOLERANCE * scale {
        return Err(FeaError::degenerate(length));
    }
    Ok((dx / length, dy / length, length))
}

fn axial_stiffness(
    kind: ElementKind,
    coords: &DMatrix<f64>,
    tensor: &DMatrix<f64>,
    factor: f64,
) -> Result<DMatrix<f64>> {
    let (c, s, length) = axial_direction(coords)?;
    let k = match kind {
        ElementKind::Bar => tensor[(0, 0)] * factor / length,
        _ => tensor[(0, 0)],
    };
    let t = [c, s];
    let mut ke = DMatrix::zeros(4, 4);
    for a in 0..2 {
        for b in 0..2 {
            let sign = if a == b { 1.0 } else { -1.0 };
            for i in 0..2 {
                for j in 0..2 {
                    ke[(2 * a + i, 2 * b + j)] = sign * k * t[i] * t[j];
                }
            }
        }
    }
    Ok(ke)
}

/// Element stiffness: sum over Gauss points, in rule order, of
/// `B^T C B |J| factor w`.
pub fn stiffness_matrix(
    kind: ElementKind,
    shape: Shape,
    coords: &DMatrix<f64>,
    tensor: &DMatrix<f64>,
    geometry_factor: f64,
    rule: &QuadratureRule,
) -> Result<DMatrix<f64>> {
    if kind.is_axial() {
        return axial_stiffness(kind, coords, tensor, geometry_factor);
    }
    let size = shape.num_nodes() * kind.node_dofs();
    let mut ke = DMatrix::zeros(size, size);
    for point in &rule.points {
        let eval = shape.evaluate(&point.coords, coords)?;
        let b = strain_operator(kind, &eval.physical_derivatives());
        let scale = eval.determinant * geometry_factor * point.weight;
        ke += (b.transpose() * tensor * &b) * scale;
    }
    Ok(ke)
}

/// Consistent mass (or heat capacity) matrix. For springs `density` is the
/// lumped nodal mass.
pub fn mass_matrix(
    kind: ElementKind,
    shape: Shape,
    coords: &DMatrix<f64>,
    density: f64,
    geometry_factor: f64,
    rule: &QuadratureRule,
) -> Result<DMatrix<f64>> {
    match kind {
        ElementKind::Spring => {
            axial_direction(coords)?;
            Ok(DMatrix::identity(4, 4) * density)
        }
        ElementKind::Bar => {
            let (_, _, length) = axial_direction(coords)?;
            let m = density * geometry_factor * length / 6.0;
            let mut me = DMatrix::zeros(4, 4);
            for a in 0..2 {
                for b in 0..2 {
                    let w = if a == b { 2.0 } else { 1.0 };
                    for d in 0..2 {
                        me[(2 * a + d, 2 * b + d)] = w * m;
                    }
                }
            }
            Ok(me)
        }
        _ => {
            let node_dofs = kind.node_dofs();
            let size = shape.num_nodes() * node_dofs;
            let mut me = DMatrix::zeros(size, size);
            for point in &rule.points {
                let eval = shape.evaluate(&point.coords, coords)?;
                let n = interpolation_matrix(&eval.n, node_dofs);
                let scale = density * eval.determinant * geometry_factor * point.weight;
                me += (n.transpose() * &n) * scale;
            }
            Ok(me)
        }
    }
}

/// Integral of |J| times the geometry factor: area*thickness for planar
/// elements, volume for solids, A*L for bars and the length for springs.
pub fn element_volume(
    kind: ElementKind,
    shape: Shape,
    coords: &DMatrix<f64>,
    geometry_factor: f64,
    rule: &QuadratureRule,
) -> Result<f64> {
    if kind.is_axial() {
        let (_, _, length) = axial_direction(coords)?;
        return Ok(length * geometry_factor);
    }
    let mut volume = 0.0;
    for point in &rule.points {
        let eval = shape.evaluate(&point.coords, coords)?;
        volume += eval.determinant * geometry_factor * point.weight;
    }
    Ok(volume)
}

/// The element capability selected once per run
#[derive(Debug, Clone)]
pub struct ElementFormulation {
    pub kind: ElementKind,
    pub shape: Shape,
    pub material: MaterialModel,
    pub rule: QuadratureRule,
    tensors: BTreeMap<usize, DMatrix<f64>>,
}

impl ElementFormulation {
    /// Validates the kind/shape/material combination and computes the
    /// constitutive tensor of every material tag up front.
    pub fn new(
        kind: ElementKind,
        shape: Shape,
        material: MaterialModel,
        quadrature_order: usize,
        materials: &PropertyTable,
    ) -> Result<ElementFormulation> {
        if !kind.supports(shape) {
            return Err(FeaError::Input(format!(
                "{} elements cannot use the {} shape",
                kind.key(),
                shape.key()
            )));
        }
        if !kind.accepts(material) {
            return Err(FeaError::Input(format!(
                "{} elements cannot use the {:?} material model",
                kind.key(),
                material
            )));
        }
        let rule = QuadratureRule::new(shape, quadrature_order)?;

        let mut tensors = BTreeMap::new();
        for (tag, record) in materials {
            let tensor = material
                .tensor(record)
                .map_err(|e| e.for_material(*tag))?;
            tensors.insert(*tag, tensor);
        }

        Ok(ElementFormulation {
            kind,
            shape,
            material,
            rule,
            tensors,
        })
    }

    pub fn node_dofs(&self) -> usize {
        self.kind.node_dofs()
    }

    pub fn element_dofs(&self) -> usize {
        self.shape.num_nodes() * self.node_dofs()
    }

    pub fn tensor(&self, tag: usize) -> Result<&DMatrix<f64>> {
        self.tensors
            .get(&tag)
            .ok_or_else(|| FeaError::material(Some(tag), "material tag not defined"))
    }

    /// Checks an incidence row against this formulation. A type tag of 0
    /// means "unspecified".
    pub fn check_element(&self, element: &Element) -> Result<()> {
        if element.nodes.len() != self.shape.num_nodes() {
            return Err(FeaError::Input(format!(
                "Element {} has {} nodes but {} needs {}",
                element.id,
                element.nodes.len(),
                self.shape.key(),
                self.shape.num_nodes()
            )));
        }
        if element.type_tag != 0 && element.type_tag != self.kind.type_tag() {
            return Err(FeaError::Input(format!(
                "Element {} has type tag {} but the model uses {} elements (tag {})",
                element.id,
                element.type_tag,
                self.kind.key(),
                self.kind.type_tag()
            )));
        }
        Ok(())
    }

    /// Planar and two-node kinds only carry in-plane DOFs, so all of their
    /// nodes must share one z coordinate.
    pub fn check_coords(&self, element: &Element, coords: &DMatrix<f64>) -> Result<()> {
        if !(self.kind.is_planar() || self.kind.is_axial()) || coords.nrows() == 0 {
            return Ok(());
        }
        let z = coords.column(2);
        let spread = z.max() - z.min();
        let scale = coords.amax().max(1.0);
        if spread > DEGENERATE_TOLERANCE * scale {
            return Err(FeaError::Input(format!(
                "Element {} must lie in the xy-plane but its nodes span {spread} in z",
                element.id
            )));
        }
        Ok(())
    }

    /// Node coordinates of an element that passed both checks
    pub fn element_coords(&self, model: &Model, element: &Element) -> Result<DMatrix<f64>> {
        self.check_element(element)?;
        let coords = model.mesh.element_coords(element)?;
        self.check_coords(element, &coords)?;
        Ok(coords)
    }

    pub fn geometry_factor(&self, model: &Model, element: &Element) -> Result<f64> {
        self.kind.geometry_factor(model.geometry(element.geometry)?)
    }

    fn density(&self, model: &Model, element: &Element) -> Result<f64> {
        let record = model.material(element.material)?;
        let names: &[&str] = match self.kind {
            ElementKind::Spring => &["MASS"],
            ElementKind::HeatPlane | ElementKind::HeatSolid => &["RHO", "CP"],
            _ => &["RHO"],
        };
        let mut density = 1.0;
        for name in names {
            let value = record.get(name).ok_or_else(|| {
                FeaError::material(Some(element.material), format!("missing property {name}"))
            })?;
            if value < 0.0 {
                return Err(FeaError::material(
                    Some(element.material),
                    format!("{name} must not be negative"),
                ));
            }
            density *= value;
        }
        Ok(density)
    }

    pub fn stiffness(&self, model: &Model, element: &Element) -> Result<DMatrix<f64>> {
        let coords = self.element_coords(model, element)?;
        let factor = self.geometry_factor(model, element)?;
        stiffness_matrix(
            self.kind,
            self.shape,
            &coords,
            self.tensor(element.material)?,
            factor,
            &self.rule,
        )
        .map_err(|e| e.in_element(element.id))
    }

    pub fn mass(&self, model: &Model, element: &Element) -> Result<DMatrix<f64>> {
        let coords = self.element_coords(model, element)?;
        let factor = self.geometry_factor(model, element)?;
        let density = self.density(model, element)?;
        mass_matrix(self.kind, self.shape, &coords, density, factor, &self.rule)
            .map_err(|e| e.in_element(element.id))
    }

    pub fn volume(&self, model: &Model, element: &Element) -> Result<f64> {
        let coords = self.element_coords(model, element)?;
        let factor = self.geometry_factor(model, element)?;
        element_volume(self.kind, self.shape, &coords, factor, &self.rule)
            .map_err(|e| e.in_element(element.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Mesh, Node};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn coords(rows: &[[f64; 3]]) -> DMatrix<f64> {
        DMatrix::from_fn(rows.len(), 3, |i, j| rows[i][j])
    }

    fn steel_plane_stress() -> DMatrix<f64> {
        MaterialModel::PlaneStress
            .elastic_tensor(&PropertyRecord::new().with("EXX", 210e3).with("VXY", 0.3))
            .unwrap()
    }

    fn unit_square() -> DMatrix<f64> {
        coords(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ])
    }

    fn unit_cube() -> DMatrix<f64> {
        coords(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ])
    }

    #[test]
    fn dof_aliases_resolve() {
        assert_eq!(ElementKind::Plane.dof_index("fy"), Some(1));
        assert_eq!(ElementKind::Solid.dof_index("UZ"), Some(2));
        assert_eq!(ElementKind::HeatPlane.dof_index("heatflux"), Some(0));
        assert_eq!(ElementKind::Plane.dof_index("uz"), None);
    }

    #[test]
    fn quad_stiffness_is_symmetric() {
        let rule = QuadratureRule::new(Shape::Quad4, 2).unwrap();
        let skewed = coords(&[
            [0.0, 0.0, 0.0],
            [2.0, 0.3, 0.0],
            [2.4, 1.7, 0.0],
            [-0.2, 1.1, 0.0],
        ]);
        let ke = stiffness_matrix(
            ElementKind::Plane,
            Shape::Quad4,
            &skewed,
            &steel_plane_stress(),
            0.5,
            &rule,
        )
        .unwrap();
        assert_eq!(ke.nrows(), 8);
        assert_relative_eq!(ke, ke.transpose(), epsilon = 1e-9, max_relative = 1e-12);
    }

    #[test]
    fn rigid_translation_has_zero_strain_energy() {
        let rule = QuadratureRule::new(Shape::Quad4, 2).unwrap();
        let ke = stiffness_matrix(
            ElementKind::Plane,
            Shape::Quad4,
            &unit_square(),
            &steel_plane_stress(),
            1.0,
            &rule,
        )
        .unwrap();
        let u = DVector::from_vec(vec![0.3, -0.7, 0.3, -0.7, 0.3, -0.7, 0.3, -0.7]);
        let energy = (u.transpose() * &ke * &u)[(0, 0)];
        assert_abs_diff_eq!(energy, 0.0, epsilon = 1e-6);

        // small rigid rotation about z: u = -theta*y, v = theta*x
        let theta = 1e-3;
        let rot = DVector::from_fn(8, |i, _| {
            let node = i / 2;
            let (x, y) = (unit_square()[(node, 0)], unit_square()[(node, 1)]);
            if i % 2 == 0 {
                -theta * y
            } else {
                theta * x
            }
        });
        assert_abs_diff_eq!((rot.transpose() * &ke * &rot)[(0, 0)], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn hexahedron_rigid_translation() {
        let rule = QuadratureRule::new(Shape::Hexa8, 2).unwrap();
        let c = MaterialModel::Isotropic
            .elastic_tensor(&PropertyRecord::new().with("EXX", 1000.0).with("VXY", 0.25))
            .unwrap();
        let ke = stiffness_matrix(ElementKind::Solid, Shape::Hexa8, &unit_cube(), &c, 1.0, &rule)
            .unwrap();
        assert_relative_eq!(ke, ke.transpose(), epsilon = 1e-9);
        let u = DVector::from_fn(24, |i, _| [1.0, 2.0, -1.0][i % 3]);
        assert_abs_diff_eq!((u.transpose() * &ke * &u)[(0, 0)], 0.0, epsilon = 1e-8);
    }

    #[test]
    fn constant_strain_triangle_matches_closed_form() {
        // CST: K = t A B^T C B with constant B
        let tri = coords(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let c = steel_plane_stress();
        let rule = QuadratureRule::new(Shape::Tria3, 1).unwrap();
        let ke = stiffness_matrix(ElementKind::Plane, Shape::Tria3, &tri, &c, 0.1, &rule).unwrap();

        let inv_2a = 1.0 / 2.0;
        let b = DMatrix::from_row_slice(
            3,
            6,
            &[
                -inv_2a * 1.0, 0.0, inv_2a * 1.0, 0.0, 0.0, 0.0, //
                0.0, -inv_2a * 2.0, 0.0, 0.0, 0.0, inv_2a * 2.0, //
                -inv_2a * 2.0, -inv_2a * 1.0, 0.0, inv_2a * 1.0, inv_2a * 2.0, 0.0,
            ],
        );
        let expected = b.transpose() * &c * &b * (0.1 * 1.0);
        assert_relative_eq!(ke, expected, epsilon = 1e-9, max_relative = 1e-12);
    }

    #[test]
    fn heat_plane_conduction_matrix_rows_sum_to_zero() {
        let k = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 3.0]));
        let rule = QuadratureRule::new(Shape::Quad4, 2).unwrap();
        let ke =
            stiffness_matrix(ElementKind::HeatPlane, Shape::Quad4, &unit_square(), &k, 1.0, &rule)
                .unwrap();
        for row in ke.row_iter() {
            assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-12);
        }
        // K11 for a unit square with kx = 2, ky = 3: (kx + ky) / 3
        assert_relative_eq!(ke[(0, 0)], 5.0 / 3.0, max_relative = 1e-12);
    }

    #[test]
    fn bar_stiffness_is_ea_over_l() {
        let bar = coords(&[[0.0, 0.0, 0.0], [6.0, 8.0, 0.0]]);
        let e = DMatrix::from_element(1, 1, 200_000.0);
        let rule = QuadratureRule::new(Shape::Line2, 1).unwrap();
        let ke = stiffness_matrix(ElementKind::Bar, Shape::Line2, &bar, &e, 2.0, &rule).unwrap();
        let k = 200_000.0 * 2.0 / 10.0;
        assert_relative_eq!(ke[(0, 0)], k * 0.36);
        assert_relative_eq!(ke[(0, 1)], k * 0.48);
        assert_relative_eq!(ke[(0, 2)], -k * 0.36);
        assert_relative_eq!(ke[(1, 3)], -k * 0.64);
    }

    #[test]
    fn mass_matrix_sums_to_total_mass() {
        let rule = QuadratureRule::new(Shape::Quad4, 2).unwrap();
        let me = mass_matrix(ElementKind::Plane, Shape::Quad4, &unit_square(), 7.85, 0.5, &rule)
            .unwrap();
        // each displacement direction carries the full mass
        assert_relative_eq!(me.sum(), 2.0 * 7.85 * 0.5, max_relative = 1e-12);
        assert_relative_eq!(me, me.transpose());

        let bar = coords(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let line = QuadratureRule::new(Shape::Line2, 1).unwrap();
        let mb = mass_matrix(ElementKind::Bar, Shape::Line2, &bar, 3.0, 0.5, &line).unwrap();
        assert_relative_eq!(mb.sum(), 2.0 * 3.0 * 0.5 * 2.0, max_relative = 1e-12);
    }

    #[test]
    fn volume_of_shapes() {
        let rule = QuadratureRule::new(Shape::Quad4, 2).unwrap();
        let v = element_volume(ElementKind::Plane, Shape::Quad4, &unit_square(), 0.25, &rule)
            .unwrap();
        assert_relative_eq!(v, 0.25);

        let rule = QuadratureRule::new(Shape::Hexa8, 1).unwrap();
        let v = element_volume(ElementKind::Solid, Shape::Hexa8, &(unit_cube() * 2.0), 1.0, &rule)
            .unwrap();
        assert_relative_eq!(v, 8.0, max_relative = 1e-12);

        let tet = coords(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]);
        let rule = QuadratureRule::new(Shape::Tetr4, 1).unwrap();
        let v = element_volume(ElementKind::Solid, Shape::Tetr4, &tet, 1.0, &rule).unwrap();
        assert_relative_eq!(v, 1.0 / 6.0, max_relative = 1e-12);
    }

    #[test]
    fn collapsed_triangle_fails() {
        let tri = coords(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let rule = QuadratureRule::new(Shape::Tria3, 1).unwrap();
        let result = stiffness_matrix(
            ElementKind::Plane,
            Shape::Tria3,
            &tri,
            &steel_plane_stress(),
            1.0,
            &rule,
        );
        assert!(matches!(result, Err(FeaError::DegenerateGeometry { .. })));
    }

    #[test]
    fn zero_length_bar_fails() {
        let bar = coords(&[[1.0, 1.0, 0.0], [1.0, 1.0, 0.0]]);
        let rule = QuadratureRule::new(Shape::Line2, 1).unwrap();
        let e = DMatrix::from_element(1, 1, 1.0);
        assert!(stiffness_matrix(ElementKind::Bar, Shape::Line2, &bar, &e, 1.0, &rule).is_err());
    }

    #[test]
    fn bar_out_of_the_xy_plane_is_rejected() {
        let mesh = Mesh::new(
            vec![Node::new(1, 0.0, 0.0, 0.0), Node::new(2, 6.0, 0.0, 8.0)],
            vec![Element::new(1, 11, 1, 1, vec![1, 2])],
        );
        let mut materials = PropertyTable::new();
        materials.insert(1, PropertyRecord::new().with("EXX", 100.0));
        let mut geometries = PropertyTable::new();
        geometries.insert(1, PropertyRecord::new().with("AREA", 1.0));
        let model = Model::new(mesh, materials, geometries);
        let formulation = ElementFormulation::new(
            ElementKind::Bar,
            Shape::Line2,
            ElementKind::Bar.default_material(),
            1,
            &model.materials,
        )
        .unwrap();
        let element = &model.mesh.elements[0];
        for err in [
            formulation.stiffness(&model, element).unwrap_err(),
            formulation.volume(&model, element).unwrap_err(),
        ] {
            match err {
                FeaError::Input(message) => assert!(message.contains("Element 1")),
                other => panic!("expected an input error, got {other:?}"),
            }
        }
    }

    #[test]
    fn planar_elements_may_sit_at_any_constant_z() {
        let mut lifted = unit_square();
        lifted.column_mut(2).fill(5.0);
        let formulation = ElementFormulation::new(
            ElementKind::Plane,
            Shape::Quad4,
            MaterialModel::PlaneStress,
            2,
            &PropertyTable::new(),
        )
        .unwrap();
        let element = Element::new(1, 0, 1, 1, vec![1, 2, 3, 4]);
        assert!(formulation.check_coords(&element, &lifted).is_ok());

        let mut warped = lifted.clone();
        warped[(2, 2)] = 5.5;
        assert!(matches!(
            formulation.check_coords(&element, &warped),
            Err(FeaError::Input(_))
        ));
    }

    #[test]
    fn formulation_rejects_mismatched_combinations() {
        let materials = PropertyTable::new();
        assert!(ElementFormulation::new(
            ElementKind::Plane,
            Shape::Hexa8,
            MaterialModel::PlaneStress,
            2,
            &materials
        )
        .is_err());
        assert!(ElementFormulation::new(
            ElementKind::Plane,
            Shape::Quad4,
            MaterialModel::Isotropic,
            2,
            &materials
        )
        .is_err());
    }

    #[test]
    fn formulation_reports_bad_material_tag() {
        let mut materials = PropertyTable::new();
        materials.insert(4, PropertyRecord::new().with("EXX", 1.0).with("VXY", 0.7));
        let err = ElementFormulation::new(
            ElementKind::Plane,
            Shape::Quad4,
            MaterialModel::PlaneStress,
            2,
            &materials,
        )
        .unwrap_err();
        assert!(matches!(err, FeaError::InvalidMaterial { tag: Some(4), .. }));
    }
}
