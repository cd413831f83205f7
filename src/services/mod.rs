pub mod dataset_service;
pub mod metadata_service;

pub use dataset_service::{DatasetService, ReadPolicy, Restrictions};
pub use metadata_service::MetadataService;
