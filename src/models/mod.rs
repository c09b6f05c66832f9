pub mod egress;
pub mod strategy;

pub use egress::*;
pub use strategy::*;
