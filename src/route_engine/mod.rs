pub mod corridor_resolver;
pub mod geometry;
pub mod signals;
