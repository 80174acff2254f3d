#![cfg_attr(all(test, feature = "unstable"), feature(test))]
#![allow(missing_docs)]

pub mod candidate;
pub mod curation;
pub mod detection_io;
pub mod error;
pub mod filters;
pub mod local_minima;
pub mod nuclei_detector;
pub mod overlap;
pub mod scale_space;
pub mod suppression;
pub mod threshold;
pub mod utils;
pub mod volume;
pub const IS_DEBUG: bool = false;
