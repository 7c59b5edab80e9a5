//! Gauss quadrature rules over the reference element of each topology.
//!
//! Tensor-product shapes (`line2`, `quad4`, `hexa8`) take the number of
//! Gauss-Legendre points per direction as their order. Simplices (`tria3`,
//! `tetr4`) select a symmetric rule by order 1, 2 or 3. In every rule the
//! weights add up to the measure of the reference element.

use crate::error::{FeaError, Result};
use crate::shape::Shape;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussPoint {
    /// Parametric coordinates; unused trailing entries are zero
    pub coords: [f64; 3],
    pub weight: f64,
}

impl GaussPoint {
    fn new(coords: [f64; 3], weight: f64) -> GaussPoint {
        GaussPoint { coords, weight }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    pub shape: Shape,
    pub order: usize,
    pub points: Vec<GaussPoint>,
}

impl QuadratureRule {
    pub fn new(shape: Shape, order: usize) -> Result<QuadratureRule> {
        let points = match shape {
            Shape::Line2 => gauss_1d(order)?
                .into_iter()
                .map(|(xi, w)| GaussPoint::new([xi, 0.0, 0.0], w))
                .collect(),
            Shape::Quad4 => {
                let line = gauss_1d(order)?;
                let mut points = Vec::with_capacity(line.len() * line.len());
                for (xi, wi) in &line {
                    for (eta, wj) in &line {
                        points.push(GaussPoint::new([*xi, *eta, 0.0], wi * wj));
                    }
                }
                points
            }
            Shape::Hexa8 => {
                let line = gauss_1d(order)?;
                let mut points = Vec::with_capacity(line.len().pow(3));
                for (xi, wi) in &line {
                    for (eta, wj) in &line {
                        for (zeta, wk) in &line {
                            points.push(GaussPoint::new([*xi, *eta, *zeta], wi * wj * wk));
                        }
                    }
                }
                points
            }
            Shape::Tria3 => gauss_tri(order)?,
            Shape::Tetr4 => gauss_tet(order)?,
        };

        let rule = QuadratureRule {
            shape,
            order,
            points,
        };
        debug_assert!((rule.weight_sum() - shape.reference_measure()).abs() < 1e-12);
        Ok(rule)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn weight_sum(&self) -> f64 {
        self.points.iter().map(|p| p.weight).sum()
    }
}

/// Gauss-Legendre points and weights on [-1, 1]
pub fn gauss_1d(n: usize) -> Result<Vec<(f64, f64)>> {
    let rule = match n {
        1 => vec![(0.0, 2.0)],
        2 => {
            let p = 1.0 / 3.0_f64.sqrt();
            vec![(-p, 1.0), (p, 1.0)]
        }
        3 => {
            let p = (3.0 / 5.0_f64).sqrt();
            vec![(-p, 5.0 / 9.0), (0.0, 8.0 / 9.0), (p, 5.0 / 9.0)]
        }
        4 => {
            let sqrt_6_5 = (6.0 / 5.0_f64).sqrt();
            let p1 = ((3.0 - 2.0 * sqrt_6_5) / 7.0).sqrt();
            let p2 = ((3.0 + 2.0 * sqrt_6_5) / 7.0).sqrt();
            let sqrt_30 = 30.0_f64.sqrt();
            let w1 = (18.0 + sqrt_30) / 36.0;
            let w2 = (18.0 - sqrt_30) / 36.0;
            vec![(-p2, w2), (-p1, w1), (p1, w1), (p2, w2)]
        }
        _ => {
            return Err(FeaError::Input(format!(
                "Gauss-Legendre rule with {n} points is not available (1 to 4)"
            )))
        }
    };
    Ok(rule)
}

/// Rules on the triangle (0,0)-(1,0)-(0,1), area 1/2
fn gauss_tri(order: usize) -> Result<Vec<GaussPoint>> {
    let rule = match order {
        1 => vec![GaussPoint::new([1.0 / 3.0, 1.0 / 3.0, 0.0], 0.5)],
        2 => {
            let w = 1.0 / 6.0;
            vec![
                GaussPoint::new([1.0 / 6.0, 1.0 / 6.0, 0.0], w),
                GaussPoint::new([2.0 / 3.0, 1.0 / 6.0, 0.0], w),
                GaussPoint::new([1.0 / 6.0, 2.0 / 3.0, 0.0], w),
            ]
        }
        3 => {
            let w = 25.0 / 96.0;
            vec![
                GaussPoint::new([1.0 / 3.0, 1.0 / 3.0, 0.0], -27.0 / 96.0),
                GaussPoint::new([0.6, 0.2, 0.0], w),
                GaussPoint::new([0.2, 0.6, 0.0], w),
                GaussPoint::new([0.2, 0.2, 0.0], w),
            ]
        }
        _ => {
            return Err(FeaError::Input(format!(
                "Quadrature order {order} is not available for tria3 (1 to 3)"
            )))
        }
    };
    Ok(rule)
}

/// Rules on the unit tetrahedron, volume 1/6
fn gauss_tet(order: usize) -> Result<Vec<GaussPoint>> {
    let rule = match order {
        1 => vec![GaussPoint::new([0.25, 0.25, 0.25], 1.0 / 6.0)],
        2 => {
            let sqrt5 = 5.0_f64.sqrt();
            let a = (5.0 + 3.0 * sqrt5) / 20.0;
            let b = (5.0 - sqrt5) / 20.0;
            let w = 1.0 / 24.0;
            vec![
                GaussPoint::new([b, b, b], w),
                GaussPoint::new([a, b, b], w),
                GaussPoint::new([b, a, b], w),
                GaussPoint::new([b, b, a], w),
            ]
        }
        3 => {
            let w = 3.0 / 40.0;
            let a = 1.0 / 6.0;
            vec![
                GaussPoint::new([0.25, 0.25, 0.25], -2.0 / 15.0),
                GaussPoint::new([a, a, a], w),
                GaussPoint::new([0.5, a, a], w),
                GaussPoint::new([a, 0.5, a], w),
                GaussPoint::new([a, a, 0.5], w),
            ]
        }
        _ => {
            return Err(FeaError::Input(format!(
                "Quadrature order {order} is not available for tetr4 (1 to 3)"
            )))
        }
    };
    Ok(rule)
}
