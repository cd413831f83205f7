pub mod auth;
pub mod response;

pub use auth::{identity_middleware, require_access, CurrentCaller};
pub use response::{ApiResponse, ApiResult};
