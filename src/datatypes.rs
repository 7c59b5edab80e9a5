use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{FeaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64, z: f64) -> Vertex {
        Vertex { x, y, z }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// One row of the node coordinate table. Ids are 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub vertex: Vertex,
}

impl Node {
    pub fn new(id: usize, x: f64, y: f64, z: f64) -> Node {
        Node {
            id,
            vertex: Vertex::new(x, y, z),
        }
    }
}

/// One row of the incidence table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: usize,
    pub type_tag: u32,
    pub material: usize,
    pub geometry: usize,
    pub nodes: Vec<usize>,
}

impl Element {
    pub fn new(
        id: usize,
        type_tag: u32,
        material: usize,
        geometry: usize,
        nodes: Vec<usize>,
    ) -> Element {
        Element {
            id,
            type_tag,
            material,
            geometry,
            nodes,
        }
    }
}

/// Named scalar properties of a material or geometry tag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    values: BTreeMap<String, f64>,
}

impl PropertyRecord {
    pub fn new() -> PropertyRecord {
        PropertyRecord::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> PropertyRecord {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_uppercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(&name.to_uppercase()).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

pub type PropertyTable = BTreeMap<usize, PropertyRecord>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
}

impl Mesh {
    pub fn new(nodes: Vec<Node>, elements: Vec<Element>) -> Mesh {
        Mesh { nodes, elements }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Looks up a node by its 1-based id
    pub fn node(&self, id: usize) -> Option<&Node> {
        if id == 0 {
            return None;
        }
        self.nodes.get(id - 1)
    }

    /// Nodal coordinates of an element, one row per node
    pub fn element_coords(&self, element: &Element) -> Result<DMatrix<f64>> {
        let mut coords = DMatrix::zeros(element.nodes.len(), 3);
        for (row, node_id) in element.nodes.iter().enumerate() {
            let node = self.node(*node_id).ok_or_else(|| {
                FeaError::Input(format!(
                    "Element {} references missing node {}",
                    element.id, node_id
                ))
            })?;
            coords[(row, 0)] = node.vertex.x;
            coords[(row, 1)] = node.vertex.y;
            coords[(row, 2)] = node.vertex.z;
        }
        Ok(coords)
    }

    /// Checks the table invariants: contiguous 1-based node ids in order,
    /// contiguous element ids, and every referenced node present.
    pub fn validate(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id != i + 1 {
                return Err(FeaError::Input(format!(
                    "Node ids must be contiguous and 1-based; found id {} at row {}",
                    node.id,
                    i + 1
                )));
            }
        }
        for (i, element) in self.elements.iter().enumerate() {
            if element.id != i + 1 {
                return Err(FeaError::Input(format!(
                    "Element ids must follow row order; found id {} at row {}",
                    element.id,
                    i + 1
                )));
            }
            if let Some(missing) = element.nodes.iter().find(|n| self.node(**n).is_none()) {
                return Err(FeaError::Input(format!(
                    "Element {} references missing node {}",
                    element.id, missing
                )));
            }
        }
        Ok(())
    }
}

/// Read-only inputs of one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub mesh: Mesh,
    pub materials: PropertyTable,
    pub geometries: PropertyTable,
}

impl Model {
    pub fn new(mesh: Mesh, materials: PropertyTable, geometries: PropertyTable) -> Model {
        Model {
            mesh,
            materials,
            geometries,
        }
    }

    pub fn material(&self, tag: usize) -> Result<&PropertyRecord> {
        self.materials
            .get(&tag)
            .ok_or_else(|| FeaError::material(Some(tag), "material tag not defined"))
    }

    pub fn geometry(&self, tag: usize) -> Result<&PropertyRecord> {
        self.geometries
            .get(&tag)
            .ok_or_else(|| FeaError::Input(format!("Geometry tag {tag} not defined")))
    }

    pub fn validate(&self) -> Result<()> {
        self.mesh.validate()?;
        for element in &self.mesh.elements {
            self.material(element.material)?;
            self.geometry(element.geometry)?;
        }
        Ok(())
    }
}
