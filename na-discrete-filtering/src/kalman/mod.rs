//! Kalman-type analysis steps.

pub use self::enkf::{analyze, Analysis};

pub mod enkf;
