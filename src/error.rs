use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, FeaError>;

#[derive(Debug, Error)]
pub enum FeaError {
    #[error("Input error: {0}")]
    Input(String),

    /// Non-positive Jacobian determinant. `element` is filled in by the
    /// assembler once the failing element is known.
    #[error("Degenerate geometry error: jacobian determinant {determinant:e}{}", fmt_element(.element))]
    DegenerateGeometry {
        element: Option<usize>,
        determinant: f64,
    },

    #[error("Invalid material error: {reason}{}", fmt_tag(.tag))]
    InvalidMaterial { tag: Option<usize>, reason: String },

    #[error("Unresolved region error: {0} matches no nodes")]
    UnresolvedRegion(String),

    #[error("Singular system error: {detail}{}", fmt_rank(.rank_deficiency))]
    SingularSystem {
        rank_deficiency: Option<usize>,
        detail: String,
    },

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Post Processor error: {0}")]
    PostProcessor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeaError {
    /// Attaches an element id to a geometry error raised below the assembler.
    pub fn in_element(self, element_id: usize) -> Self {
        match self {
            FeaError::DegenerateGeometry { determinant, .. } => FeaError::DegenerateGeometry {
                element: Some(element_id),
                determinant,
            },
            other => other,
        }
    }

    /// Attaches a material tag to a material error raised by a constitutive model.
    pub fn for_material(self, material_tag: usize) -> Self {
        match self {
            FeaError::InvalidMaterial { tag: None, reason } => FeaError::InvalidMaterial {
                tag: Some(material_tag),
                reason,
            },
            other => other,
        }
    }

    pub(crate) fn degenerate(determinant: f64) -> Self {
        FeaError::DegenerateGeometry {
            element: None,
            determinant,
        }
    }

    pub(crate) fn material(tag: Option<usize>, reason: impl Into<String>) -> Self {
        FeaError::InvalidMaterial {
            tag,
            reason: reason.into(),
        }
    }
}

fn fmt_element(element: &Option<usize>) -> String {
    match element {
        Some(id) => format!(" in element {id}"),
        None => String::new(),
    }
}

fn fmt_tag(tag: &Option<usize>) -> String {
    match tag {
        Some(tag) => format!(" (material tag {tag})"),
        None => String::new(),
    }
}

fn fmt_rank(rank_deficiency: &Option<usize>) -> String {
    match rank_deficiency {
        Some(n) => format!(" (rank deficiency {n})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_is_attached_to_geometry_errors_only() {
        let err = FeaError::degenerate(0.0).in_element(7);
        assert!(matches!(
            err,
            FeaError::DegenerateGeometry {
                element: Some(7),
                ..
            }
        ));
        assert!(err.to_string().contains("in element 7"));

        let err = FeaError::Input("bad".to_owned()).in_element(7);
        assert!(matches!(err, FeaError::Input(_)));
    }

    #[test]
    fn singular_message_reports_rank_deficiency() {
        let err = FeaError::SingularSystem {
            rank_deficiency: Some(3),
            detail: "cholesky pivot vanished".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "Singular system error: cholesky pivot vanished (rank deficiency 3)"
        );
    }
}
