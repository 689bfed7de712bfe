pub mod addr;
pub mod cache;
pub mod common;
pub mod geometry;
pub mod sim;
pub mod trace;
pub mod tracer;

#[cfg(feature = "stat")]
pub mod stat;
