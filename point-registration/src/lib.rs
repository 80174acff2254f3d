#![cfg_attr(all(test, feature = "unstable"), feature(test))]
#![allow(missing_docs)]

pub mod affine;
pub mod assignment;
pub mod error;
pub mod icp;
pub mod landmark;
pub mod ransac;
pub mod registration;
pub mod shape_context;
pub mod utils;
pub const IS_DEBUG: bool = false;
