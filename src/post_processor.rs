use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    analysis::AnalysisResults,
    assembly::dof_index,
    datatypes::Model,
    element::ElementKind,
    error::{FeaError, Result},
};

fn create(path: &Path) -> Result<BufWriter<File>> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(FeaError::PostProcessor(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `model` - The analysed model
/// * `kind` - The element kind, which names the DOF columns
/// * `results` - The results of the run
/// * `output_dir` - Directory receiving `nodes.csv` and `elements.csv`
///
/// # Returns
/// The paths of the nodes and elements files, in that order
pub fn csv_output(
    model: &Model,
    kind: ElementKind,
    results: &AnalysisResults,
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    let node_dofs = kind.node_dofs();
    let expected = model.mesh.num_nodes() * node_dofs;
    if results.solution.len() != expected || results.reactions.len() != expected {
        return Err(FeaError::PostProcessor(format!(
            "Results cover {} DOFs but the model has {expected}",
            results.solution.len()
        )));
    }

    std::fs::create_dir_all(output_dir)?;
    let nodes_output = output_dir.join("nodes.csv");
    let elements_output = output_dir.join("elements.csv");

    // Write nodes
    let mut nodes_file = create(&nodes_output)?;
    let mut header = String::from("id,x,y,z");
    for name in kind.dof_names() {
        header.push_str(&format!(",{name}"));
    }
    for name in kind.dof_names() {
        header.push_str(&format!(",r_{name}"));
    }
    writeln!(nodes_file, "{header}")?;
    for node in &model.mesh.nodes {
        let mut line = format!(
            "{id},{x},{y},{z}",
            id = node.id,
            x = node.vertex.x,
            y = node.vertex.y,
            z = node.vertex.z
        );
        for local in 0..node_dofs {
            line.push_str(&format!(",{}", results.solution[dof_index(node.id, local, node_dofs)]));
        }
        for local in 0..node_dofs {
            line.push_str(&format!(",{}", results.reactions[dof_index(node.id, local, node_dofs)]));
        }
        writeln!(nodes_file, "{line}")?;
    }
    nodes_file.flush()?;

    // Write elements
    let mut elements_file = create(&elements_output)?;
    writeln!(elements_file, "id,volume,equivalent,energy_density")?;
    for result in &results.element_results {
        writeln!(
            elements_file,
            "{id},{volume},{equivalent},{energy}",
            id = result.id,
            volume = result.volume,
            equivalent = result.equivalent,
            energy = result.energy_density
        )?;
    }
    elements_file.flush()?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok((nodes_output, elements_output))
}
