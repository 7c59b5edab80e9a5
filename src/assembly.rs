use indicatif::ProgressBar;
use log::{debug, info};
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::{
    datatypes::{Element, Mesh, Model},
    element::ElementFormulation,
    error::{FeaError, Result},
};

/// Global DOF index (zero-based) of a local DOF on a 1-based node.
///
/// Matches the 1-based map `node_dofs * id - (node_dofs - 1 - local)` shifted
/// down by one.
pub fn dof_index(node_id: usize, local: usize, node_dofs: usize) -> usize {
    node_dofs * (node_id - 1) + local
}

/// Global DOF indices of an element, node-major
pub fn element_dofs(element: &Element, node_dofs: usize) -> Vec<usize> {
    element
        .nodes
        .iter()
        .flat_map(|id| (0..node_dofs).map(move |d| dof_index(*id, d, node_dofs)))
        .collect()
}

pub fn total_dofs(mesh: &Mesh, node_dofs: usize) -> usize {
    mesh.num_nodes() * node_dofs
}

/// Coordinate-format accumulator. Entries are only ever appended, so
/// duplicates add up when converted to compressed form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripletAccumulator {
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletAccumulator {
    pub fn new() -> TripletAccumulator {
        TripletAccumulator::default()
    }

    pub fn with_capacity(capacity: usize) -> TripletAccumulator {
        TripletAccumulator {
            rows: Vec::with_capacity(capacity),
            cols: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    /// Scatter-add of a dense element matrix through its DOF map
    pub fn add_element_matrix(&mut self, dofs: &[usize], matrix: &DMatrix<f64>) {
        for (i, row) in dofs.iter().enumerate() {
            for (j, col) in dofs.iter().enumerate() {
                self.push(*row, *col, matrix[(i, j)]);
            }
        }
    }

    /// Appends another accumulator, keeping its order
    pub fn merge(&mut self, other: TripletAccumulator) {
        self.rows.extend(other.rows);
        self.cols.extend(other.cols);
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((r, c), v)| (*r, *c, *v))
    }

    /// Converts to a square CSR matrix, summing duplicate entries
    pub fn to_csr(&self, size: usize) -> Result<CsrMatrix<f64>> {
        let coo = CooMatrix::try_from_triplets(
            size,
            size,
            self.rows.clone(),
            self.cols.clone(),
            self.values.clone(),
        )
        .map_err(|e| FeaError::Input(format!("Triplet index outside the {size} DOF system: {e}")))?;
        Ok(CsrMatrix::from(&coo))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblyOptions {
    /// Compute element contributions on the rayon pool
    pub parallel: bool,
    pub with_mass: bool,
    pub progress: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        AssemblyOptions {
            parallel: true,
            with_mass: false,
            progress: false,
        }
    }
}

/// Assembled global matrices, owned by one analysis run
#[derive(Debug, Clone)]
pub struct GlobalSystem {
    pub stiffness: CsrMatrix<f64>,
    pub mass: Option<CsrMatrix<f64>>,
    pub total_dofs: usize,
}

impl GlobalSystem {
    /// Folds a matrix delta (Robin terms, grounded springs) into the stiffness
    pub fn add_stiffness(&mut self, delta: &TripletAccumulator) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let delta = delta.to_csr(self.total_dofs)?;
        self.stiffness = &self.stiffness + &delta;
        Ok(())
    }
}

pub struct Assembler<'a> {
    model: &'a Model,
    formulation: &'a ElementFormulation,
    options: AssemblyOptions,
}

impl<'a> Assembler<'a> {
    pub fn new(
        model: &'a Model,
        formulation: &'a ElementFormulation,
        options: AssemblyOptions,
    ) -> Assembler<'a> {
        Assembler {
            model,
            formulation,
            options,
        }
    }

    pub fn total_dofs(&self) -> usize {
        total_dofs(&self.model.mesh, self.formulation.node_dofs())
    }

    fn progress_bar(&self) -> ProgressBar {
        if self.options.progress {
            ProgressBar::new(self.model.mesh.num_elements() as u64)
        } else {
            ProgressBar::hidden()
        }
    }

    /// Computes one dense matrix per element and merges them into a single
    /// accumulator in element order. Workers never touch the shared
    /// accumulator, so the result is identical with and without rayon.
    fn collect_triplets<F>(&self, what: &str, compute: F) -> Result<TripletAccumulator>
    where
        F: Fn(&Element) -> Result<DMatrix<f64>> + Sync,
    {
        let node_dofs = self.formulation.node_dofs();
        let elements = &self.model.mesh.elements;
        let bar = self.progress_bar();

        let local = |element: &Element| -> Result<TripletAccumulator> {
            let matrix = compute(element).map_err(|e| e.in_element(element.id))?;
            let dofs = element_dofs(element, node_dofs);
            let mut triplets = TripletAccumulator::with_capacity(dofs.len() * dofs.len());
            triplets.add_element_matrix(&dofs, &matrix);
            bar.inc(1);
            Ok(triplets)
        };

        let contributions: Vec<TripletAccumulator> = if self.options.parallel {
            elements.par_iter().map(local).collect::<Result<Vec<_>>>()?
        } else {
            elements.iter().map(local).collect::<Result<Vec<_>>>()?
        };

        let size = self.formulation.element_dofs();
        let mut accumulator = TripletAccumulator::with_capacity(elements.len() * size * size);
        for contribution in contributions {
            accumulator.merge(contribution);
        }
        bar.finish_and_clear();
        debug!("collected {} {what} triplets", accumulator.len());

        Ok(accumulator)
    }

    pub fn stiffness_triplets(&self) -> Result<TripletAccumulator> {
        self.collect_triplets("stiffness", |e| self.formulation.stiffness(self.model, e))
    }

    pub fn mass_triplets(&self) -> Result<TripletAccumulator> {
        self.collect_triplets("mass", |e| self.formulation.mass(self.model, e))
    }

    pub fn element_volumes(&self) -> Result<Vec<f64>> {
        let volume = |e: &Element| self.formulation.volume(self.model, e);
        if self.options.parallel {
            self.model.mesh.elements.par_iter().map(volume).collect()
        } else {
            self.model.mesh.elements.iter().map(volume).collect()
        }
    }

    pub fn assemble(&self) -> Result<GlobalSystem> {
        let total_dofs = self.total_dofs();
        info!(
            "assembling {} {} elements into {} DOFs",
            self.model.mesh.num_elements(),
            self.formulation.kind.key(),
            total_dofs
        );

        let stiffness = self.stiffness_triplets()?.to_csr(total_dofs)?;
        let mass = if self.options.with_mass {
            Some(self.mass_triplets()?.to_csr(total_dofs)?)
        } else {
            None
        };
        info!("assembled stiffness with {} non-zeros", stiffness.nnz());

        Ok(GlobalSystem {
            stiffness,
            mass,
            total_dofs,
        })
    }
}

/// y = A x for a CSR matrix
pub fn csr_mul_vec(matrix: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    matrix
        .row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(j, v)| v * x[*j])
                .sum::<f64>()
        })
        .collect()
}
