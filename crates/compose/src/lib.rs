//! log-shipper compiler: turns logging sources and destinations into one
//! agent configuration document.

#![forbid(unsafe_code)]

mod composer;
mod destination;
mod error;
pub mod model;
pub mod naming;
mod sink;
mod source;
mod transform;

pub use composer::{compile, Compiled};
pub use error::CompileError;
pub use model::{ConfigDocument, GraphError, Pipeline, Stage, StageKind};
