#![forbid(unsafe_code)]

//! Built-in decorators.
//!
//! Reshaping stages:
//!
//! - [`Filter`]: keep items matching a predicate.
//! - [`Sort`]: order by a comparator, stable on ties.
//! - [`Distinct`]: one representative per key.
//! - [`Group`]: synthesized header before each run of equal keys.
//! - [`Flatten`]: splice nested collections in place of their owners.
//! - [`Limit`]: keep the first N items, optionally counting only some.
//! - [`HeaderFooter`]: fixed items around the sequence.
//! - [`Convert`]: map every item, with optional cleanup.
//! - [`Materialize`]: cache point with no effect on the sequence.
//!
//! Observing stages pass every event through and report a derived value:
//!
//! - [`Accumulate`]: running total.
//! - [`MinMax`]: smallest and largest key.
//! - [`FirstLast`]: both ends of the sequence.
//!
//! # Invariants
//!
//! 1. Replaying a stage's emitted events over its previous output yields
//!    the output of [`Decorator::decorate`](crate::decorator::Decorator::decorate).
//! 2. Stages that emit more than one event per input require a cache.
//! 3. Observer callbacks never run while the collection state is borrowed.

mod aggregate;
mod convert;
mod distinct;
mod filter;
mod flatten;
mod group;
mod header_footer;
mod limit;
mod materialize;
mod sort;
mod tracker;

pub use aggregate::{Accumulate, Extremes, MinMax};
pub use convert::Convert;
pub use distinct::Distinct;
pub use filter::Filter;
pub use flatten::Flatten;
pub use group::Group;
pub use header_footer::HeaderFooter;
pub use limit::Limit;
pub use materialize::Materialize;
pub use sort::Sort;
pub use tracker::FirstLast;
