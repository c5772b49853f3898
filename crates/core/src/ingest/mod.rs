pub mod cache;
pub mod chains;
pub mod normalize;
pub mod types;
pub mod universe;
