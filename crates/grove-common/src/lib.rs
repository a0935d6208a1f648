//! Grove common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Grove components.

pub mod error;
pub mod geom;
pub mod num;

pub use error::{GroveError, Result};
pub use geom::{Bounds, Point2, QuadrantLabel};
pub use num::{abs, max_of, modulo, modulo_bounded, Scalar};
