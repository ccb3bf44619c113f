pub mod runtime;
pub mod st_model;

pub use runtime::*;
pub use st_model::*;
