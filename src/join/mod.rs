//! Spatial-temporal join of traffic samples against active road works.
//!
//! For each date found in a traffic partition, the works active that day are
//! bucketed on a 0.001° grid ([`cell`]), every sample is matched against the
//! works in the surrounding cells with an exact haversine check
//! ([`distance`]), and matches are folded into per
//! (work, segment, date, hour) statistics ([`aggregate`]). [`runner`] drives
//! the whole run and hands the rows to the sinks.

pub mod aggregate;
pub mod cell;
pub mod distance;
pub mod runner;
pub mod types;
pub mod utility;
pub mod works;
