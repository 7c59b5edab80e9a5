//! One linear static analysis run.
//!
//! Stages run in order and each returns a `Result`, so a failure in any of
//! them stops the run before a partial system can reach the solver:
//! assemble, integrate loads, fold Robin and spring terms into the
//! stiffness, partition, reduce, solve, expand, post-process.

use log::{debug, info};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::{
    assembly::{Assembler, AssemblyOptions},
    boundary::{BoundaryDescriptor, BoundaryIntegrator},
    constraints::ConstraintPartition,
    datatypes::Model,
    element::{ElementFormulation, ElementKind},
    error::{FeaError, Result},
    loads::{LoadDescriptor, LoadIntegrator},
    material::MaterialModel,
    postprocess::{element_results, reactions, ElementResult},
    shape::Shape,
    solver::{solve, SolveInfo, SolverSettings},
};

/// Element capability chosen once for the whole mesh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementSetup {
    pub kind: ElementKind,
    pub shape: Shape,
    pub material: MaterialModel,
    pub quadrature_order: usize,
}

impl ElementSetup {
    /// Default material model and a quadrature order of 2
    pub fn new(kind: ElementKind, shape: Shape) -> ElementSetup {
        ElementSetup {
            kind,
            shape,
            material: kind.default_material(),
            quadrature_order: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub solver: SolverSettings,
    pub parallel: bool,
    pub with_mass: bool,
    pub progress: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            solver: SolverSettings::default(),
            parallel: true,
            with_mass: false,
            progress: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResults {
    /// Displacement or temperature per global DOF
    pub solution: DVector<f64>,
    pub load: DVector<f64>,
    pub reactions: DVector<f64>,
    /// Stiffness including Robin and grounded-spring terms
    pub stiffness: CsrMatrix<f64>,
    pub mass: Option<CsrMatrix<f64>>,
    pub element_volumes: Vec<f64>,
    pub element_results: Vec<ElementResult>,
    pub solve_info: SolveInfo,
}

pub struct Analysis {
    pub model: Model,
    pub formulation: ElementFormulation,
    pub loads: Vec<LoadDescriptor>,
    pub boundaries: Vec<BoundaryDescriptor>,
    pub settings: AnalysisSettings,
}

impl Analysis {
    /// Validates the tables and the element capability. Material errors
    /// surface here, before anything is assembled.
    pub fn new(
        model: Model,
        setup: ElementSetup,
        loads: Vec<LoadDescriptor>,
        boundaries: Vec<BoundaryDescriptor>,
        settings: AnalysisSettings,
    ) -> Result<Analysis> {
        model.validate()?;
        let formulation = ElementFormulation::new(
            setup.kind,
            setup.shape,
            setup.material,
            setup.quadrature_order,
            &model.materials,
        )?;
        for element in &model.mesh.elements {
            formulation.element_coords(&model, element)?;
            formulation.geometry_factor(&model, element)?;
        }
        info!(
            "model has {} nodes, {} {} elements of shape {}",
            model.mesh.num_nodes(),
            model.mesh.num_elements(),
            setup.kind.key(),
            setup.shape.key()
        );

        Ok(Analysis {
            model,
            formulation,
            loads,
            boundaries,
            settings,
        })
    }

    pub fn run(&self) -> Result<AnalysisResults> {
        let options = AssemblyOptions {
            parallel: self.settings.parallel,
            with_mass: self.settings.with_mass,
            progress: self.settings.progress,
        };
        let assembler = Assembler::new(&self.model, &self.formulation, options);
        let mut system = assembler.assemble()?;

        info!("applying {} loads...", self.loads.len());
        let mut delta =
            LoadIntegrator::new(&self.model, &self.formulation).integrate_all(&self.loads)?;
        let boundary = BoundaryIntegrator::new(&self.model, &self.formulation);
        delta.accumulate(boundary.robin(&self.boundaries)?);
        if !delta.matrix.is_empty() {
            debug!("adding {} stiffness triplets from loads", delta.matrix.len());
        }
        system.add_stiffness(&delta.matrix)?;
        let load = delta.vector;

        info!("applying {} boundary conditions...", self.boundaries.len());
        let prescribed = boundary.essential(&self.boundaries)?;
        let partition = ConstraintPartition::from_prescribed(&prescribed, system.total_dofs)?;
        info!(
            "{} free and {} fixed DOFs",
            partition.num_free(),
            partition.fixed.len()
        );
        if partition.num_free() == 0 {
            return Err(FeaError::Input(
                "Every DOF is prescribed; nothing to solve".to_owned(),
            ));
        }

        let (k_ff, f_f) = partition.reduce(&system.stiffness, &load)?;
        let mut solver_settings = self.settings.solver.clone();
        solver_settings.progress = self.settings.progress;
        let (u_f, solve_info) = solve(&k_ff, &f_f, &solver_settings)?;
        let solution = partition.expand(&u_f)?;

        info!("post-processing...");
        let reactions = reactions(&system.stiffness, &solution, &load);
        let element_volumes = assembler.element_volumes()?;
        let element_results =
            element_results(&self.model, &self.formulation, &solution, &element_volumes)?;
        info!("analysis complete");

        Ok(AnalysisResults {
            solution,
            load,
            reactions,
            stiffness: system.stiffness,
            mass: system.mass,
            element_volumes,
            element_results,
            solve_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryKind;
    use crate::datatypes::{Element, Mesh, Node, PropertyRecord, PropertyTable};
    use crate::loads::LoadKind;
    use crate::region::Region;
    use approx::assert_relative_eq;

    fn bar_model() -> Model {
        let nodes = vec![Node::new(1, 0.0, 0.0, 0.0), Node::new(2, 10.0, 0.0, 0.0)];
        let elements = vec![Element::new(1, 11, 1, 1, vec![1, 2])];
        let mut materials = PropertyTable::new();
        materials.insert(1, PropertyRecord::new().with("EXX", 200_000.0));
        let mut geometries = PropertyTable::new();
        geometries.insert(1, PropertyRecord::new().with("AREA", 1.0));
        Model::new(Mesh::new(nodes, elements), materials, geometries)
    }

    #[test]
    fn bar_under_tip_load() {
        let analysis = Analysis::new(
            bar_model(),
            ElementSetup::new(ElementKind::Bar, Shape::Line2),
            vec![LoadDescriptor::new(
                "tip",
                LoadKind::Nodal { value: 100.0 },
                "fx",
                Region::Nodes(vec![2]),
            )],
            vec![
                BoundaryDescriptor::new(
                    "wall",
                    BoundaryKind::Essential { value: 0.0 },
                    "full",
                    Region::Nodes(vec![1]),
                ),
                BoundaryDescriptor::new(
                    "roller",
                    BoundaryKind::Essential { value: 0.0 },
                    "uy",
                    Region::Nodes(vec![2]),
                ),
            ],
            AnalysisSettings::default(),
        )
        .unwrap();
        let results = analysis.run().unwrap();
        assert_relative_eq!(results.solution[2], 0.005, max_relative = 1e-12);
        assert_relative_eq!(results.reactions[0], -100.0, max_relative = 1e-12);
        assert_relative_eq!(results.element_results[0].stress[0], 100.0, max_relative = 1e-12);
        assert_relative_eq!(results.element_volumes[0], 10.0);
    }

    #[test]
    fn bad_material_fails_at_setup() {
        let mut model = bar_model();
        model.materials.insert(1, PropertyRecord::new().with("EXX", -1.0));
        let err = Analysis::new(
            model,
            ElementSetup::new(ElementKind::Bar, Shape::Line2),
            Vec::new(),
            Vec::new(),
            AnalysisSettings::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, FeaError::InvalidMaterial { tag: Some(1), .. }));
    }

    #[test]
    fn missing_area_fails_at_setup() {
        let mut model = bar_model();
        model.geometries.insert(1, PropertyRecord::new());
        assert!(Analysis::new(
            model,
            ElementSetup::new(ElementKind::Bar, Shape::Line2),
            Vec::new(),
            Vec::new(),
            AnalysisSettings::default(),
        )
        .is_err());
    }
}
