//! Derived element quantities and reactions from a solved field.
//!
//! Strain and stress are sampled at the parametric centroid. Thermal kinds
//! report the temperature gradient as strain and the heat flux `-K grad T`
//! as stress; bars and springs report elongation and axial force.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::{
    assembly::{csr_mul_vec, element_dofs},
    datatypes::{Element, Model},
    element::{axial_direction, strain_operator, ElementFormulation, ElementKind},
    error::{FeaError, Result},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementResult {
    pub id: usize,
    pub volume: f64,
    pub strain: Vec<f64>,
    pub stress: Vec<f64>,
    /// Von Mises stress, heat flux magnitude or absolute axial force
    pub equivalent: f64,
    /// `0.5 u^T K u / V`
    pub energy_density: f64,
}

/// Equivalent scalar of a stress-like vector
pub fn equivalent(kind: ElementKind, stress: &[f64]) -> f64 {
    match kind {
        ElementKind::Plane => {
            let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
            (sx * sx - sx * sy + sy * sy + 3.0 * txy * txy).sqrt()
        }
        ElementKind::Solid => {
            let (sx, sy, sz) = (stress[0], stress[1], stress[2]);
            let shear = stress[3] * stress[3] + stress[4] * stress[4] + stress[5] * stress[5];
            (0.5 * ((sx - sy).powi(2) + (sy - sz).powi(2) + (sz - sx).powi(2)) + 3.0 * shear)
                .sqrt()
        }
        ElementKind::HeatPlane | ElementKind::HeatSolid => {
            stress.iter().map(|q| q * q).sum::<f64>().sqrt()
        }
        ElementKind::Bar | ElementKind::Spring => stress[0].abs(),
    }
}

pub fn element_result(
    model: &Model,
    formulation: &ElementFormulation,
    element: &Element,
    solution: &DVector<f64>,
    volume: f64,
) -> Result<ElementResult> {
    let dofs = element_dofs(element, formulation.node_dofs());
    let u = DVector::from_iterator(dofs.len(), dofs.iter().map(|d| solution[*d]));
    let coords = model.mesh.element_coords(element)?;
    let tensor = formulation.tensor(element.material)?;

    let (strain, stress) = match formulation.kind {
        ElementKind::Bar | ElementKind::Spring => {
            let (c, s, length) =
                axial_direction(&coords).map_err(|e| e.in_element(element.id))?;
            let elongation = (u[2] - u[0]) * c + (u[3] - u[1]) * s;
            if formulation.kind == ElementKind::Bar {
                let area = formulation.geometry_factor(model, element)?;
                let strain = elongation / length;
                (vec![strain], vec![tensor[(0, 0)] * area * strain])
            } else {
                (vec![elongation], vec![tensor[(0, 0)] * elongation])
            }
        }
        kind => {
            let centroid = formulation.shape.centroid();
            let eval = formulation
                .shape
                .evaluate(&centroid, &coords)
                .map_err(|e| e.in_element(element.id))?;
            let b = strain_operator(kind, &eval.physical_derivatives());
            let strain = &b * &u;
            let mut stress = tensor * &strain;
            if kind.is_thermal() {
                stress = -stress;
            }
            (strain.as_slice().to_vec(), stress.as_slice().to_vec())
        }
    };

    let ke = formulation.stiffness(model, element)?;
    let energy = 0.5 * u.dot(&(&ke * &u));
    let energy_density = if volume > 0.0 { energy / volume } else { 0.0 };

    Ok(ElementResult {
        id: element.id,
        volume,
        equivalent: equivalent(formulation.kind, &stress),
        strain,
        stress,
        energy_density,
    })
}

pub fn element_results(
    model: &Model,
    formulation: &ElementFormulation,
    solution: &DVector<f64>,
    volumes: &[f64],
) -> Result<Vec<ElementResult>> {
    if volumes.len() != model.mesh.num_elements() {
        return Err(FeaError::PostProcessor(format!(
            "{} element volumes given for {} elements",
            volumes.len(),
            model.mesh.num_elements()
        )));
    }
    model
        .mesh
        .elements
        .iter()
        .zip(volumes)
        .map(|(element, volume)| element_result(model, formulation, element, solution, *volume))
        .collect()
}

/// Reactions `R = K u - F` over all DOFs; zero up to round-off on free DOFs
pub fn reactions(
    stiffness: &CsrMatrix<f64>,
    solution: &DVector<f64>,
    load: &DVector<f64>,
) -> DVector<f64> {
    DVector::from_vec(csr_mul_vec(stiffness, solution.as_slice())) - load
}
