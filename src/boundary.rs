use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    assembly::dof_index,
    datatypes::Model,
    element::ElementFormulation,
    error::{FeaError, Result},
    loads::{LoadDelta, LoadDescriptor, LoadIntegrator, LoadKind},
    region::Region,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// Prescribed value on the selected DOFs
    Essential { value: f64 },
    /// Homogeneous natural condition (free or insulated edge)
    Natural,
    /// Convective exchange, folded into the stiffness
    Robin { film: f64, ambient: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DofSelector {
    All,
    Named(String),
}

impl DofSelector {
    pub fn from_key(key: &str) -> DofSelector {
        match key.to_lowercase().as_str() {
            "full" | "all" => DofSelector::All,
            other => DofSelector::Named(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryDescriptor {
    pub name: String,
    pub kind: BoundaryKind,
    pub dof: DofSelector,
    pub region: Region,
    pub required: bool,
}

impl BoundaryDescriptor {
    pub fn new(name: &str, kind: BoundaryKind, dof: &str, region: Region) -> BoundaryDescriptor {
        BoundaryDescriptor {
            name: name.to_owned(),
            kind,
            dof: DofSelector::from_key(dof),
            region,
            required: false,
        }
    }

    pub fn required(mut self) -> BoundaryDescriptor {
        self.required = true;
        self
    }

    fn owner(&self) -> String {
        format!("boundary condition '{}'", self.name)
    }
}

pub struct BoundaryIntegrator<'a> {
    model: &'a Model,
    formulation: &'a ElementFormulation,
}

impl<'a> BoundaryIntegrator<'a> {
    pub fn new(model: &'a Model, formulation: &'a ElementFormulation) -> BoundaryIntegrator<'a> {
        BoundaryIntegrator { model, formulation }
    }

    fn local_dofs(&self, boundary: &BoundaryDescriptor) -> Result<Vec<usize>> {
        let kind = self.formulation.kind;
        match &boundary.dof {
            DofSelector::All => Ok((0..kind.node_dofs()).collect()),
            DofSelector::Named(name) => kind.dof_index(name).map(|d| vec![d]).ok_or_else(|| {
                FeaError::Input(format!(
                    "Boundary condition '{}' targets DOF '{}' which {} elements do not have",
                    boundary.name,
                    name,
                    kind.key()
                ))
            }),
        }
    }

    /// Prescribed (global DOF, value) pairs in application order. A DOF may
    /// appear more than once; the partitioner keeps the last value.
    pub fn essential(&self, boundaries: &[BoundaryDescriptor]) -> Result<Vec<(usize, f64)>> {
        let node_dofs = self.formulation.node_dofs();
        let mut prescribed = Vec::new();
        for boundary in boundaries {
            let locals = self.local_dofs(boundary)?;
            let nodes = boundary
                .region
                .resolve(&self.model.mesh, &boundary.owner(), boundary.required)?;
            match boundary.kind {
                BoundaryKind::Essential { value } => {
                    for id in &nodes {
                        for local in &locals {
                            prescribed.push((dof_index(*id, *local, node_dofs), value));
                        }
                    }
                    debug!(
                        "{} fixes {} DOFs to {value}",
                        boundary.owner(),
                        nodes.len() * locals.len()
                    );
                }
                BoundaryKind::Natural => {
                    debug!("{} leaves {} nodes free", boundary.owner(), nodes.len());
                }
                BoundaryKind::Robin { .. } => {}
            }
        }
        Ok(prescribed)
    }

    /// Load and stiffness deltas of every Robin condition
    pub fn robin(&self, boundaries: &[BoundaryDescriptor]) -> Result<LoadDelta> {
        let integrator = LoadIntegrator::new(self.model, self.formulation);
        let mut total = LoadDelta::zeros(integrator.total_dofs());
        for boundary in boundaries {
            let BoundaryKind::Robin { film, ambient } = boundary.kind else {
                continue;
            };
            let dof = match &boundary.dof {
                DofSelector::All => "temp".to_owned(),
                DofSelector::Named(name) => name.clone(),
            };
            let load = LoadDescriptor {
                name: boundary.name.clone(),
                kind: LoadKind::Convection { film, ambient },
                dof,
                region: boundary.region.clone(),
                required: boundary.required,
            };
            total.accumulate(integrator.integrate(&load)?);
        }
        Ok(total)
    }
}
