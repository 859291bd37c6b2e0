#[macro_use]
extern crate ndarray as nd;
extern crate num_traits;
extern crate thiserror;

pub use cholesky::*;

pub mod cholesky;
