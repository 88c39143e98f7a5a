pub mod baseline;
pub mod params;

// Re-export common types
pub use baseline::{BaselineStore, Comparison};
pub use params::ParamsFile;
