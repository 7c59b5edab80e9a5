//! Constitutive models.
//!
//! Each variant is a pure function from a material record to a symmetric
//! tensor in Voigt order: `[xx, yy, xy]` for planar elasticity,
//! `[xx, yy, zz, xy, yz, xz]` for solids.

use nalgebra::{linalg::Cholesky, DMatrix};
use serde::{Deserialize, Serialize};

use crate::datatypes::PropertyRecord;
use crate::error::{FeaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaterialModel {
    PlaneStress,
    PlaneStrain,
    OrthotropicPlaneStress,
    Isotropic,
    Orthotropic,
    /// Heat conduction, isotropic or orthotropic depending on which
    /// conductivities are present
    Conductivity { dim: usize },
    /// Single axial stiffness for bars (`EXX`) and springs (`STIF`)
    Axial { property: AxialProperty },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxialProperty {
    Modulus,
    Stiffness,
}

fn require(record: &PropertyRecord, name: &str) -> Result<f64> {
    let value = record
        .get(name)
        .ok_or_else(|| FeaError::material(None, format!("missing property {name}")))?;
    if !value.is_finite() {
        return Err(FeaError::material(None, format!("{name} is not finite")));
    }
    Ok(value)
}

fn require_positive(record: &PropertyRecord, name: &str) -> Result<f64> {
    let value = require(record, name)?;
    if value <= 0.0 {
        return Err(FeaError::material(
            None,
            format!("{name} must be positive, got {value}"),
        ));
    }
    Ok(value)
}

fn isotropic_poisson(record: &PropertyRecord) -> Result<f64> {
    let v = require(record, "VXY")?;
    if v <= -1.0 || v >= 0.5 {
        return Err(FeaError::material(
            None,
            format!("Poisson ratio must lie in (-1, 0.5), got {v}"),
        ));
    }
    Ok(v)
}

fn ensure_positive_definite(tensor: DMatrix<f64>, what: &str) -> Result<DMatrix<f64>> {
    if Cholesky::new(tensor.clone()).is_none() {
        return Err(FeaError::material(
            None,
            format!("{what} tensor is not positive definite"),
        ));
    }
    Ok(tensor)
}

impl MaterialModel {
    pub fn from_key(key: &str, planar: bool, dim: usize) -> Option<MaterialModel> {
        match key.to_lowercase().as_str() {
            "planestress" => Some(MaterialModel::PlaneStress),
            "planestrain" => Some(MaterialModel::PlaneStrain),
            "orthotropic" if planar => Some(MaterialModel::OrthotropicPlaneStress),
            "orthotropic" => Some(MaterialModel::Orthotropic),
            "isotropic" | "solid" => Some(MaterialModel::Isotropic),
            "heat" | "heatplane" | "heatsolid" | "thermal" => {
                Some(MaterialModel::Conductivity { dim })
            }
            "axial" | "bar" => Some(MaterialModel::Axial {
                property: AxialProperty::Modulus,
            }),
            "spring" => Some(MaterialModel::Axial {
                property: AxialProperty::Stiffness,
            }),
            _ => None,
        }
    }

    pub fn is_thermal(&self) -> bool {
        matches!(self, MaterialModel::Conductivity { .. })
    }

    /// Size of the tensor this model produces
    pub fn tensor_size(&self) -> usize {
        match self {
            MaterialModel::PlaneStress
            | MaterialModel::PlaneStrain
            | MaterialModel::OrthotropicPlaneStress => 3,
            MaterialModel::Isotropic | MaterialModel::Orthotropic => 6,
            MaterialModel::Conductivity { dim } => *dim,
            MaterialModel::Axial { .. } => 1,
        }
    }

    /// Elastic stiffness tensor for structural models
    pub fn elastic_tensor(&self, record: &PropertyRecord) -> Result<DMatrix<f64>> {
        match self {
            MaterialModel::PlaneStress => {
                let e = require_positive(record, "EXX")?;
                let v = isotropic_poisson(record)?;
                let d = e / (1.0 - v * v);
                Ok(DMatrix::from_row_slice(
                    3,
                    3,
                    &[d, d * v, 0.0, d * v, d, 0.0, 0.0, 0.0, e / (2.0 * (1.0 + v))],
                ))
            }
            MaterialModel::PlaneStrain => {
                let e = require_positive(record, "EXX")?;
                let v = isotropic_poisson(record)?;
                let f = e / ((1.0 + v) * (1.0 - 2.0 * v));
                Ok(DMatrix::from_row_slice(
                    3,
                    3,
                    &[
                        f * (1.0 - v),
                        f * v,
                        0.0,
                        f * v,
                        f * (1.0 - v),
                        0.0,
                        0.0,
                        0.0,
                        f * (1.0 - 2.0 * v) / 2.0,
                    ],
                ))
            }
            MaterialModel::OrthotropicPlaneStress => {
                let ex = require_positive(record, "EXX")?;
                let ey = require_positive(record, "EYY")?;
                let vxy = require(record, "VXY")?;
                let gxy = require_positive(record, "GXY")?;
                let vyx = vxy * ey / ex;
                let denom = 1.0 - vxy * vyx;
                if denom <= 0.0 {
                    return Err(FeaError::material(
                        None,
                        format!("orthotropic Poisson ratios give 1 - vxy*vyx = {denom}"),
                    ));
                }
                Ok(DMatrix::from_row_slice(
                    3,
                    3,
                    &[
                        ex / denom,
                        vyx * ex / denom,
                        0.0,
                        vxy * ey / denom,
                        ey / denom,
                        0.0,
                        0.0,
                        0.0,
                        gxy,
                    ],
                ))
            }
            MaterialModel::Isotropic => {
                let e = require_positive(record, "EXX")?;
                let v = isotropic_poisson(record)?;
                let f = e / ((1.0 + v) * (1.0 - 2.0 * v));
                let c11 = f * (1.0 - v);
                let c12 = f * v;
                let g = e / (2.0 * (1.0 + v));
                let mut c = DMatrix::zeros(6, 6);
                for i in 0..3 {
                    for j in 0..3 {
                        c[(i, j)] = if i == j { c11 } else { c12 };
                    }
                    c[(i + 3, i + 3)] = g;
                }
                Ok(c)
            }
            MaterialModel::Orthotropic => {
                // invert the compliance matrix
                let ex = require_positive(record, "EXX")?;
                let ey = require_positive(record, "EYY")?;
                let ez = require_positive(record, "EZZ")?;
                let vxy = require(record, "VXY")?;
                let vyz = require(record, "VYZ")?;
                let vxz = require(record, "VXZ")?;
                let gxy = require_positive(record, "GXY")?;
                let gyz = require_positive(record, "GYZ")?;
                let gxz = require_positive(record, "GXZ")?;

                let mut s = DMatrix::zeros(6, 6);
                s[(0, 0)] = 1.0 / ex;
                s[(1, 1)] = 1.0 / ey;
                s[(2, 2)] = 1.0 / ez;
                s[(0, 1)] = -vxy / ex;
                s[(1, 0)] = -vxy / ex;
                s[(0, 2)] = -vxz / ex;
                s[(2, 0)] = -vxz / ex;
                s[(1, 2)] = -vyz / ey;
                s[(2, 1)] = -vyz / ey;
                s[(3, 3)] = 1.0 / gxy;
                s[(4, 4)] = 1.0 / gyz;
                s[(5, 5)] = 1.0 / gxz;

                let s = ensure_positive_definite(s, "orthotropic compliance")?;
                let c = s.try_inverse().ok_or_else(|| {
                    FeaError::material(None, "orthotropic compliance is singular")
                })?;
                // restore exact symmetry lost in the inversion
                Ok((&c + c.transpose()) * 0.5)
            }
            MaterialModel::Axial { property } => {
                let value = match property {
                    AxialProperty::Modulus => require_positive(record, "EXX")?,
                    AxialProperty::Stiffness => require_positive(record, "STIF")?,
                };
                Ok(DMatrix::from_element(1, 1, value))
            }
            MaterialModel::Conductivity { .. } => Err(FeaError::material(
                None,
                "conductivity model has no elastic tensor",
            )),
        }
    }

    /// Thermal conductivity tensor. `KYY` and `KZZ` fall back to `KXX`.
    pub fn conductivity_tensor(&self, record: &PropertyRecord) -> Result<DMatrix<f64>> {
        let dim = match self {
            MaterialModel::Conductivity { dim } => *dim,
            _ => {
                return Err(FeaError::material(
                    None,
                    "structural model has no conductivity tensor",
                ))
            }
        };
        let kxx = require_positive(record, "KXX")?;
        let mut k = DMatrix::zeros(dim, dim);
        for (i, name) in ["KXX", "KYY", "KZZ"].iter().take(dim).enumerate() {
            k[(i, i)] = match record.get(name) {
                Some(_) => require_positive(record, name)?,
                None => kxx,
            };
        }
        Ok(k)
    }

    /// Tensor for whichever physics this model belongs to
    pub fn tensor(&self, record: &PropertyRecord) -> Result<DMatrix<f64>> {
        if self.is_thermal() {
            self.conductivity_tensor(record)
        } else {
            self.elastic_tensor(record)
        }
    }
}
