//! Adaptive multivariate kernel association testing.
//!
//! Decides whether a set of candidate predictor columns is associated with
//! one or more response columns by combining rank-based feature screening,
//! empirically centered kernel similarity matrices and a standardized
//! signal-to-noise statistic whose null distribution is estimated by
//! permutation resampling.
//!
//! The computational entry point is [`statistic::AssociationTest`]; the
//! remaining modules are the side-effect-free services it orchestrates.

#![deny(dead_code)]
#![deny(unused_imports)]

pub mod filter;
pub mod kernel;
pub mod ranks;
pub mod signal;
pub mod spearman;
pub mod statistic;
pub mod tail_area;
