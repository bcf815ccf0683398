//! Node graph model and its structural validation.

pub(crate) mod model;
pub(crate) mod validate;
