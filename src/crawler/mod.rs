pub mod links;
pub mod params;
pub mod traversal;

// Re-export common types
pub use params::{generate_visual_test_params, name_collisions, TestParam};
