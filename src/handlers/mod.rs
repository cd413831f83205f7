// Route handlers for the data API
//
// data     - dataset reads and writes under /data/:dataset
// metadata - search plus per-dataset metadata
// params   - repeated-key query string parsing shared by both
pub mod data;
pub mod metadata;
pub mod params;

pub use params::QueryParams;
