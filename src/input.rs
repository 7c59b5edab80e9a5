use json::JsonValue;
use log::info;

use crate::{
    analysis::ElementSetup,
    boundary::{BoundaryDescriptor, BoundaryKind, DofSelector},
    datatypes::{Element, Mesh, Model, Node, PropertyRecord, PropertyTable},
    element::ElementKind,
    error::{FeaError, Result},
    loads::{LoadDescriptor, LoadKind},
    material::MaterialModel,
    region::{BoundingBox, Region},
    shape::Shape,
    solver::{SolverMethod, SolverSettings},
};

/// Everything an input file describes
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub model: Model,
    pub setup: ElementSetup,
    pub loads: Vec<LoadDescriptor>,
    pub boundaries: Vec<BoundaryDescriptor>,
    pub solver: SolverSettings,
}

/// Loads the input file and checks its top-level fields
///
/// # Arguments
/// * `input_file` - The path to the input file
///
/// # Returns
/// A JsonValue object
pub fn load_input_file(input_file: &str) -> Result<JsonValue> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(f) => f,
        Err(err) => {
            return Err(FeaError::Input(format!(
                "Unable to open input file {input_file}: {err}"
            )))
        }
    };
    parse_input_json(&file_string)
}

fn parse_input_json(text: &str) -> Result<JsonValue> {
    let input_json = match json::parse(text) {
        Ok(f) => f,
        Err(err) => return Err(FeaError::Input(format!("Error in input file json: {err}"))),
    };

    for key in ["element", "material", "geometry", "nodes", "elements"] {
        if !input_json.has_key(key) {
            return Err(FeaError::Input(format!("Input json missing {key} field")));
        }
    }
    if !input_json["element"].has_key("type") {
        return Err(FeaError::Input(
            "Input json missing type field in element section".to_owned(),
        ));
    }
    if !input_json["element"].has_key("shape") {
        return Err(FeaError::Input(
            "Input json missing shape field in element section".to_owned(),
        ));
    }
    if !input_json["material"].has_key("properties") {
        return Err(FeaError::Input(
            "Input json missing properties field in material section".to_owned(),
        ));
    }

    Ok(input_json)
}

fn get_f64(value: &JsonValue, key: &str, context: &str) -> Result<f64> {
    value[key]
        .as_f64()
        .ok_or_else(|| FeaError::Input(format!("Bad or missing value for {key} in {context}")))
}

fn get_usize(value: &JsonValue, key: &str, context: &str) -> Result<usize> {
    value[key]
        .as_usize()
        .ok_or_else(|| FeaError::Input(format!("Bad or missing value for {key} in {context}")))
}

fn get_str<'a>(value: &'a JsonValue, key: &str, context: &str) -> Result<&'a str> {
    value[key]
        .as_str()
        .ok_or_else(|| FeaError::Input(format!("Bad or missing value for {key} in {context}")))
}

/// Parses the element section
fn parse_element_setup(input_json: &JsonValue) -> Result<ElementSetup> {
    let section = &input_json["element"];
    let type_key = get_str(section, "type", "element")?;
    let kind = ElementKind::from_key(type_key)
        .ok_or_else(|| FeaError::Input(format!("Unrecognized element type {type_key}")))?;
    let shape_key = get_str(section, "shape", "element")?;
    let shape = Shape::from_key(shape_key)
        .ok_or_else(|| FeaError::Input(format!("Unrecognized element shape {shape_key}")))?;

    let mut setup = ElementSetup::new(kind, shape);
    if section.has_key("quadrature") {
        setup.quadrature_order = get_usize(section, "quadrature", "element")?;
    }
    if input_json["material"].has_key("model") {
        let model_key = get_str(&input_json["material"], "model", "material")?;
        setup.material = MaterialModel::from_key(model_key, kind.is_planar(), shape.dim())
            .ok_or_else(|| FeaError::Input(format!("Unrecognized material model {model_key}")))?;
    }
    Ok(setup)
}

/// Parses a list of `{ "tag": n, "NAME": value, ... }` records
fn parse_property_table(list: &JsonValue, context: &str) -> Result<PropertyTable> {
    if !list.is_array() {
        return Err(FeaError::Input(format!("{context} must be a list")));
    }
    let mut table = PropertyTable::new();
    for entry in list.members() {
        let tag = get_usize(entry, "tag", context)?;
        let mut record = PropertyRecord::new();
        for (name, value) in entry.entries() {
            if name == "tag" {
                continue;
            }
            let value = value.as_f64().ok_or_else(|| {
                FeaError::Input(format!("Bad value for {name} in {context} tag {tag}"))
            })?;
            record.insert(name, value);
        }
        if table.insert(tag, record).is_some() {
            return Err(FeaError::Input(format!("Duplicate {context} tag {tag}")));
        }
    }
    Ok(table)
}

/// Parses `[[id, x, y, z], ...]`; z may be omitted
fn parse_nodes(list: &JsonValue) -> Result<Vec<Node>> {
    let mut nodes = Vec::with_capacity(list.len());
    for row in list.members() {
        let bad = || FeaError::Input(format!("Bad node row {}", row.dump()));
        if row.len() < 3 {
            return Err(bad());
        }
        let id = row[0].as_usize().ok_or_else(bad)?;
        let x = row[1].as_f64().ok_or_else(bad)?;
        let y = row[2].as_f64().ok_or_else(bad)?;
        let z = if row.len() > 3 {
            row[3].as_f64().ok_or_else(bad)?
        } else {
            0.0
        };
        nodes.push(Node::new(id, x, y, z));
    }
    Ok(nodes)
}

/// Parses `[[id, type_tag, material, geometry, node...], ...]`
fn parse_elements(list: &JsonValue) -> Result<Vec<Element>> {
    let mut elements = Vec::with_capacity(list.len());
    for row in list.members() {
        let bad = || FeaError::Input(format!("Bad element row {}", row.dump()));
        if row.len() < 6 {
            return Err(bad());
        }
        let id = row[0].as_usize().ok_or_else(bad)?;
        let type_tag = row[1].as_u32().ok_or_else(bad)?;
        let material = row[2].as_usize().ok_or_else(bad)?;
        let geometry = row[3].as_usize().ok_or_else(bad)?;
        let nodes = (4..row.len())
            .map(|i| row[i].as_usize().ok_or_else(bad))
            .collect::<Result<Vec<usize>>>()?;
        elements.push(Element::new(id, type_tag, material, geometry, nodes));
    }
    Ok(elements)
}

/// Parses a region object. No region selects every node.
fn parse_region(rule_json: &JsonValue, name: &str) -> Result<Region> {
    if !rule_json.has_key("region") {
        return Ok(Region::All);
    }
    let region_json = &rule_json["region"];
    if region_json.has_key("nodes") {
        let ids = region_json["nodes"]
            .members()
            .map(|v| {
                v.as_usize()
                    .ok_or_else(|| FeaError::Input(format!("Bad node id in region of {name}")))
            })
            .collect::<Result<Vec<usize>>>()?;
        return Ok(Region::Nodes(ids));
    }

    let mut bounds = BoundingBox::default();
    let limits: [(&str, &mut f64); 6] = [
        ("x_target_min", &mut bounds.x_min),
        ("x_target_max", &mut bounds.x_max),
        ("y_target_min", &mut bounds.y_min),
        ("y_target_max", &mut bounds.y_max),
        ("z_target_min", &mut bounds.z_min),
        ("z_target_max", &mut bounds.z_max),
    ];
    for (key, limit) in limits {
        if region_json.has_key(key) {
            *limit = get_f64(region_json, key, name)?;
        }
    }
    if !bounds.is_ordered() {
        return Err(FeaError::Input(format!(
            "Region of '{name}' has a minimum greater than its maximum"
        )));
    }
    Ok(Region::Box(bounds))
}

fn rule_name(rule_json: &JsonValue, index: usize, prefix: &str) -> String {
    match rule_json["name"].as_str() {
        Some(name) => name.to_owned(),
        None => format!("{prefix}{}", index + 1),
    }
}

/// Parses the loads list
fn parse_loads(input_json: &JsonValue) -> Result<Vec<LoadDescriptor>> {
    let mut loads = Vec::new();
    for (i, rule_json) in input_json["loads"].members().enumerate() {
        let name = rule_name(rule_json, i, "load");
        let kind = match get_str(rule_json, "type", &name)?.to_lowercase().as_str() {
            "nodal" | "forcenode" => LoadKind::Nodal {
                value: get_f64(rule_json, "value", &name)?,
            },
            "edge" | "forceedge" | "surface" | "forcesurf" | "heatfluxedge" => LoadKind::Edge {
                value: get_f64(rule_json, "value", &name)?,
            },
            "body" | "forcebody" | "heatgeneration" => LoadKind::Body {
                value: get_f64(rule_json, "value", &name)?,
            },
            "convection" | "convectionedge" => LoadKind::Convection {
                film: get_f64(rule_json, "film", &name)?,
                ambient: get_f64(rule_json, "ambient", &name)?,
            },
            "spring" | "spring2ground" => LoadKind::Spring {
                stiffness: get_f64(rule_json, "value", &name)?,
            },
            other => {
                return Err(FeaError::Input(format!(
                    "Load '{name}' has unrecognized type {other}"
                )))
            }
        };
        loads.push(LoadDescriptor {
            dof: get_str(rule_json, "dof", &name)?.to_owned(),
            region: parse_region(rule_json, &name)?,
            required: rule_json["required"].as_bool().unwrap_or(false),
            name,
            kind,
        });
    }
    info!("loaded {} load rules from input file", loads.len());
    Ok(loads)
}

/// Parses the boundary_conditions list
fn parse_boundary_conditions(input_json: &JsonValue) -> Result<Vec<BoundaryDescriptor>> {
    let mut boundaries = Vec::new();
    for (i, rule_json) in input_json["boundary_conditions"].members().enumerate() {
        let name = rule_name(rule_json, i, "boundary");
        let kind = match get_str(rule_json, "type", &name)?.to_lowercase().as_str() {
            "essential" | "fixed" | "displacement" | "temperature" => BoundaryKind::Essential {
                value: rule_json["value"].as_f64().unwrap_or(0.0),
            },
            "natural" | "insulated" | "free" => BoundaryKind::Natural,
            "robin" | "convection" => BoundaryKind::Robin {
                film: get_f64(rule_json, "film", &name)?,
                ambient: get_f64(rule_json, "ambient", &name)?,
            },
            other => {
                return Err(FeaError::Input(format!(
                    "Boundary '{name}' has unrecognized type {other}"
                )))
            }
        };
        let dof = match rule_json["dof"].as_str() {
            Some(dof) => DofSelector::from_key(dof),
            None => DofSelector::All,
        };
        boundaries.push(BoundaryDescriptor {
            region: parse_region(rule_json, &name)?,
            required: rule_json["required"].as_bool().unwrap_or(false),
            name,
            kind,
            dof,
        });
    }
    info!(
        "loaded {} boundary rules from input file",
        boundaries.len()
    );
    Ok(boundaries)
}

/// Parses the optional solver section
fn parse_solver_settings(input_json: &JsonValue) -> Result<SolverSettings> {
    let mut settings = SolverSettings::default();
    if !input_json.has_key("solver") {
        return Ok(settings);
    }
    let section = &input_json["solver"];
    if section.has_key("method") {
        let key = get_str(section, "method", "solver")?;
        settings.method = SolverMethod::from_key(key)
            .ok_or_else(|| FeaError::Input(format!("Unrecognized solver method {key}")))?;
    }
    if section.has_key("symmetric") {
        settings.symmetric = section["symmetric"]
            .as_bool()
            .ok_or_else(|| FeaError::Input("Bad value for symmetric in solver".to_owned()))?;
    }
    if section.has_key("tolerance") {
        settings.tolerance = get_f64(section, "tolerance", "solver")?;
        if settings.tolerance <= 0.0 {
            return Err(FeaError::Input("Solver tolerance must be positive".to_owned()));
        }
    }
    if section.has_key("max_iterations") {
        settings.max_iterations = Some(
            section["max_iterations"]
                .as_u64()
                .ok_or_else(|| {
                    FeaError::Input("Bad value for max_iterations in solver".to_owned())
                })?,
        );
    }
    Ok(settings)
}

/// Builds every analysis input from parsed json
pub fn parse_input(input_json: &JsonValue) -> Result<ModelInput> {
    let setup = parse_element_setup(input_json)?;
    let materials = parse_property_table(&input_json["material"]["properties"], "material")?;
    let geometries = parse_property_table(&input_json["geometry"], "geometry")?;
    let mesh = Mesh::new(
        parse_nodes(&input_json["nodes"])?,
        parse_elements(&input_json["elements"])?,
    );
    info!(
        "read {} nodes and {} elements",
        mesh.num_nodes(),
        mesh.num_elements()
    );

    Ok(ModelInput {
        model: Model::new(mesh, materials, geometries),
        setup,
        loads: parse_loads(input_json)?,
        boundaries: parse_boundary_conditions(input_json)?,
        solver: parse_solver_settings(input_json)?,
    })
}

/// Reads and parses an input file
pub fn read_input(input_file: &str) -> Result<ModelInput> {
    let input_json = load_input_file(input_file)?;
    parse_input(&input_json)
}

/// Parses input json text
pub fn read_input_str(text: &str) -> Result<ModelInput> {
    let input_json = parse_input_json(text)?;
    parse_input(&input_json)
}
