//! Linear static finite element analysis: shape functions, constitutive
//! models, element matrices, sparse assembly, constraint elimination and
//! the linear solve.

pub mod analysis;
pub mod assembly;
pub mod boundary;
pub mod constraints;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod input;
pub mod loads;
pub mod material;
pub mod post_processor;
pub mod postprocess;
pub mod quadrature;
pub mod region;
pub mod shape;
pub mod solver;
