//! Isoparametric shape functions for the supported element topologies.

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{FeaError, Result};

/// Relative threshold below which a Jacobian determinant counts as zero
pub const DEGENERATE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Line2,
    Tria3,
    Quad4,
    Tetr4,
    Hexa8,
}

const LINE2_NODES: [[f64; 3]; 2] = [[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
const TRIA3_NODES: [[f64; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
const QUAD4_NODES: [[f64; 3]; 4] = [
    [-1.0, -1.0, 0.0],
    [1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
];
const TETR4_NODES: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];
const HEXA8_NODES: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

const LINE2_FACETS: [&[usize]; 2] = [&[0], &[1]];
const TRIA3_FACETS: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const QUAD4_FACETS: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const TETR4_FACETS: [&[usize]; 4] = [&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[0, 3, 2]];
const HEXA8_FACETS: [&[usize]; 6] = [
    &[0, 3, 2, 1],
    &[4, 5, 6, 7],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
];

impl Shape {
    pub fn from_key(key: &str) -> Option<Shape> {
        match key.to_lowercase().as_str() {
            "line2" => Some(Shape::Line2),
            "tria3" => Some(Shape::Tria3),
            "quad4" => Some(Shape::Quad4),
            "tetr4" => Some(Shape::Tetr4),
            "hexa8" => Some(Shape::Hexa8),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Shape::Line2 => "line2",
            Shape::Tria3 => "tria3",
            Shape::Quad4 => "quad4",
            Shape::Tetr4 => "tetr4",
            Shape::Hexa8 => "hexa8",
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.node_params().len()
    }

    /// Number of parametric coordinates
    pub fn dim(&self) -> usize {
        match self {
            Shape::Line2 => 1,
            Shape::Tria3 | Shape::Quad4 => 2,
            Shape::Tetr4 | Shape::Hexa8 => 3,
        }
    }

    /// Length, area or volume of the reference element
    pub fn reference_measure(&self) -> f64 {
        match self {
            Shape::Line2 => 2.0,
            Shape::Tria3 => 0.5,
            Shape::Quad4 => 4.0,
            Shape::Tetr4 => 1.0 / 6.0,
            Shape::Hexa8 => 8.0,
        }
    }

    pub fn node_params(&self) -> &'static [[f64; 3]] {
        match self {
            Shape::Line2 => &LINE2_NODES,
            Shape::Tria3 => &TRIA3_NODES,
            Shape::Quad4 => &QUAD4_NODES,
            Shape::Tetr4 => &TETR4_NODES,
            Shape::Hexa8 => &HEXA8_NODES,
        }
    }

    /// Parametric centroid of the reference element
    pub fn centroid(&self) -> [f64; 3] {
        let params = self.node_params();
        let mut c = [0.0; 3];
        for p in params {
            for k in 0..3 {
                c[k] += p[k];
            }
        }
        c.map(|v| v / params.len() as f64)
    }

    /// Local node lists of the boundary facets: edges for planar shapes,
    /// faces for solids, end points for lines.
    pub fn facets(&self) -> &'static [&'static [usize]] {
        match self {
            Shape::Line2 => &LINE2_FACETS,
            Shape::Tria3 => &TRIA3_FACETS,
            Shape::Quad4 => &QUAD4_FACETS,
            Shape::Tetr4 => &TETR4_FACETS,
            Shape::Hexa8 => &HEXA8_FACETS,
        }
    }

    pub fn facet_shape(&self) -> Option<Shape> {
        match self {
            Shape::Line2 => None,
            Shape::Tria3 | Shape::Quad4 => Some(Shape::Line2),
            Shape::Tetr4 => Some(Shape::Tria3),
            Shape::Hexa8 => Some(Shape::Quad4),
        }
    }

    /// Shape function values N at a parametric point
    pub fn values(&self, xi: &[f64; 3]) -> DVector<f64> {
        let [r, s, t] = *xi;
        match self {
            Shape::Line2 => DVector::from_vec(vec![0.5 * (1.0 - r), 0.5 * (1.0 + r)]),
            Shape::Tria3 => DVector::from_vec(vec![1.0 - r - s, r, s]),
            Shape::Quad4 => DVector::from_iterator(
                4,
                QUAD4_NODES
                    .iter()
                    .map(|p| 0.25 * (1.0 + p[0] * r) * (1.0 + p[1] * s)),
            ),
            Shape::Tetr4 => DVector::from_vec(vec![1.0 - r - s - t, r, s, t]),
            Shape::Hexa8 => DVector::from_iterator(
                8,
                HEXA8_NODES
                    .iter()
                    .map(|p| 0.125 * (1.0 + p[0] * r) * (1.0 + p[1] * s) * (1.0 + p[2] * t)),
            ),
        }
    }

    /// Parametric derivatives, one row per parametric coordinate
    pub fn derivatives(&self, xi: &[f64; 3]) -> DMatrix<f64> {
        let [r, s, t] = *xi;
        match self {
            Shape::Line2 => DMatrix::from_row_slice(1, 2, &[-0.5, 0.5]),
            Shape::Tria3 => DMatrix::from_row_slice(2, 3, &[-1.0, 1.0, 0.0, -1.0, 0.0, 1.0]),
            Shape::Quad4 => {
                let mut dn = DMatrix::zeros(2, 4);
                for (i, p) in QUAD4_NODES.iter().enumerate() {
                    dn[(0, i)] = 0.25 * p[0] * (1.0 + p[1] * s);
                    dn[(1, i)] = 0.25 * p[1] * (1.0 + p[0] * r);
                }
                dn
            }
            Shape::Tetr4 => DMatrix::from_row_slice(
                3,
                4,
                &[
                    -1.0, 1.0, 0.0, 0.0, //
                    -1.0, 0.0, 1.0, 0.0, //
                    -1.0, 0.0, 0.0, 1.0,
                ],
            ),
            Shape::Hexa8 => {
                let mut dn = DMatrix::zeros(3, 8);
                for (i, p) in HEXA8_NODES.iter().enumerate() {
                    let a = 1.0 + p[0] * r;
                    let b = 1.0 + p[1] * s;
                    let c = 1.0 + p[2] * t;
                    dn[(0, i)] = 0.125 * p[0] * b * c;
                    dn[(1, i)] = 0.125 * p[1] * a * c;
                    dn[(2, i)] = 0.125 * p[2] * a * b;
                }
                dn
            }
        }
    }

    /// J = dN * X, with `coords` holding one row per node (x, y, z).
    /// Only the first `dim` coordinate columns take part.
    pub fn jacobian(&self, xi: &[f64; 3], coords: &DMatrix<f64>) -> DMatrix<f64> {
        let dn = self.derivatives(xi);
        &dn * coords.columns(0, self.dim())
    }

    /// Evaluates N, dN, J, det J and J^-1 at a parametric point.
    ///
    /// Fails with `DegenerateGeometry` when det J is not positive, which
    /// indicates an inverted or collapsed element.
    pub fn evaluate(&self, xi: &[f64; 3], coords: &DMatrix<f64>) -> Result<ShapeEval> {
        if coords.nrows() != self.num_nodes() {
            return Err(FeaError::Input(format!(
                "{} expects {} nodes, got {}",
                self.key(),
                self.num_nodes(),
                coords.nrows()
            )));
        }
        let dn = self.derivatives(xi);
        let jacobian = &dn * coords.columns(0, self.dim());
        let determinant = jacobian.determinant();

        let scale = jacobian.amax().powi(self.dim() as i32);
        if !determinant.is_finite() || determinant <= DEGENERATE_TOLERANCE * scale {
            return Err(FeaError::degenerate(determinant));
        }
        let inverse = jacobian
            .clone()
            .try_inverse()
            .ok_or_else(|| FeaError::degenerate(determinant))?;

        Ok(ShapeEval {
            n: self.values(xi),
            dn,
            jacobian,
            determinant,
            inverse,
        })
    }
}

/// Shape quantities at one parametric point of one element
#[derive(Debug, Clone)]
pub struct ShapeEval {
    pub n: DVector<f64>,
    pub dn: DMatrix<f64>,
    pub jacobian: DMatrix<f64>,
    pub determinant: f64,
    pub inverse: DMatrix<f64>,
}

impl ShapeEval {
    /// Derivatives with respect to physical coordinates (dim x nodes)
    pub fn physical_derivatives(&self) -> DMatrix<f64> {
        &self.inverse * &self.dn
    }
}

/// Measure scaling of a shape embedded in 3D space: edge length factor for
/// lines, area factor for surfaces, volume factor for solids.
///
/// Used for facets and for line elements lying anywhere in the plane.
pub fn metric_factor(shape: Shape, xi: &[f64; 3], coords: &DMatrix<f64>) -> Result<f64> {
    let tangents = shape.derivatives(xi) * coords;
    let row = |i: usize| Vector3::new(tangents[(i, 0)], tangents[(i, 1)], tangents[(i, 2)]);
    let scale = tangents.amax().powi(shape.dim() as i32);
    let factor = match shape.dim() {
        1 => row(0).norm(),
        2 => row(0).cross(&row(1)).norm(),
        _ => row(0).dot(&row(1).cross(&row(2))),
    };
    if !factor.is_finite() || factor <= DEGENERATE_TOLERANCE * scale {
        return Err(FeaError::degenerate(factor));
    }
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SHAPES: [Shape; 5] = [
        Shape::Line2,
        Shape::Tria3,
        Shape::Quad4,
        Shape::Tetr4,
        Shape::Hexa8,
    ];

    fn reference_coords(shape: Shape) -> DMatrix<f64> {
        let params = shape.node_params();
        DMatrix::from_fn(params.len(), 3, |i, j| params[i][j])
    }

    #[test]
    fn partition_of_unity() {
        let points = [[0.0, 0.0, 0.0], [0.2, 0.3, 0.1], [-0.7, 0.4, 0.9], [0.1, 0.1, 0.1]];
        for shape in SHAPES {
            for xi in &points {
                assert_abs_diff_eq!(shape.values(xi).sum(), 1.0, epsilon = 1e-14);
                for row in shape.derivatives(xi).row_iter() {
                    assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-14);
                }
            }
        }
    }

    #[test]
    fn kronecker_property_at_nodes() {
        for shape in SHAPES {
            for (i, p) in shape.node_params().iter().enumerate() {
                let n = shape.values(p);
                for j in 0..shape.num_nodes() {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(n[j], expected, epsilon = 1e-14);
                }
            }
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-6;
        let xi = [0.15, 0.25, 0.3];
        for shape in SHAPES {
            let dn = shape.derivatives(&xi);
            for k in 0..shape.dim() {
                let mut plus = xi;
                let mut minus = xi;
                plus[k] += h;
                minus[k] -= h;
                let fd = (shape.values(&plus) - shape.values(&minus)) / (2.0 * h);
                for i in 0..shape.num_nodes() {
                    assert_abs_diff_eq!(dn[(k, i)], fd[i], epsilon = 1e-8);
                }
            }
        }
    }

    #[test]
    fn reference_element_has_identity_jacobian() {
        for shape in [Shape::Tria3, Shape::Quad4, Shape::Tetr4, Shape::Hexa8] {
            let eval = shape
                .evaluate(&shape.centroid(), &reference_coords(shape))
                .unwrap();
            assert_abs_diff_eq!(eval.determinant, 1.0, epsilon = 1e-14);
            assert_abs_diff_eq!(
                eval.inverse,
                DMatrix::identity(shape.dim(), shape.dim()),
                epsilon = 1e-14
            );
        }
    }

    #[test]
    fn scaled_quad_jacobian() {
        // 4 x 2 rectangle: J = diag(2, 1)
        let coords = DMatrix::from_row_slice(
            4,
            3,
            &[0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 4.0, 2.0, 0.0, 0.0, 2.0, 0.0],
        );
        let eval = Shape::Quad4.evaluate(&[0.3, -0.2, 0.0], &coords).unwrap();
        assert_abs_diff_eq!(eval.determinant, 2.0, epsilon = 1e-14);
        let dndx = eval.physical_derivatives();
        // dN/dx of node 2 at (0.3, -0.2): 0.25 * (1 - 0.2) / 2
        assert_abs_diff_eq!(dndx[(0, 1)], 0.1, epsilon = 1e-14);
    }

    #[test]
    fn coincident_nodes_are_degenerate() {
        let coords = DMatrix::from_row_slice(
            3,
            3,
            &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0],
        );
        let err = Shape::Tria3
            .evaluate(&Shape::Tria3.centroid(), &coords)
            .unwrap_err();
        assert!(matches!(err, FeaError::DegenerateGeometry { .. }));
    }

    #[test]
    fn inverted_element_is_degenerate() {
        // clockwise node order
        let coords = DMatrix::from_row_slice(
            3,
            3,
            &[0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0],
        );
        assert!(Shape::Tria3.evaluate(&[0.2, 0.2, 0.0], &coords).is_err());
    }

    #[test]
    fn metric_factor_of_inclined_edge() {
        let coords = DMatrix::from_row_slice(2, 3, &[0.0, 0.0, 0.0, 3.0, 4.0, 0.0]);
        let factor = metric_factor(Shape::Line2, &[0.0, 0.0, 0.0], &coords).unwrap();
        assert_abs_diff_eq!(factor, 2.5, epsilon = 1e-14);
    }

    #[test]
    fn facets_use_matching_topology() {
        for shape in [Shape::Tria3, Shape::Quad4, Shape::Tetr4, Shape::Hexa8] {
            let facet_nodes = shape.facet_shape().unwrap().num_nodes();
            assert!(shape.facets().iter().all(|f| f.len() == facet_nodes));
        }
    }
}
