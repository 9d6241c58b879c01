//! Content filters for filtered topics.
//!
//! A filter is compiled once against the data type's schema and evaluated
//! by the substrate while routing samples, so data that does not match
//! never occupies reader buffer space.
//!
//! # Example
//!
//! ```ignore
//! let expression = FilterExpression::new("position.x >= %0")
//!     .with_parameters(vec!["0".to_string()]);
//! let filter = CompiledFilter::for_type::<Pose>(&expression)?;
//! assert!(filter.evaluate(&pose));
//! ```

mod compile;
mod predicate;

pub use compile::{CompiledFilter, FilterExpression};
