//! Task domain model.

pub mod model;
