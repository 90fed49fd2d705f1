//! Materials, the material catalog, and top-of-column flag predicates.
#![forbid(unsafe_code)]

pub mod material;

pub use material::{AIR, MaterialCatalog, MaterialDef, MaterialId, TopFlags};
