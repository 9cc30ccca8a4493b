//! HTML rendering for the public blog surface.

pub mod views;
