mod decl;
mod error;
mod validate;

pub use decl::{ControllerMeta, InputDecl, InputKind, Mapper, OutputDecl, OutputKind};
pub use error::GraphError;
pub use validate::{validate, ResolvedGraph};
