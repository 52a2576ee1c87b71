//! HTTP handlers. Each validates its payload, dispatches to the owning
//! service, and wraps the outcome in the `ApiResponse` envelope; domain
//! errors map to status codes through `ApiError::into_response`.

mod escrows;
mod listings;
mod rates;
mod trades;

pub use escrows::*;
pub use listings::*;
pub use rates::*;
pub use trades::*;
