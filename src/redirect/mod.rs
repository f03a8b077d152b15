pub mod destination;
pub mod handlers;
pub mod routes;

pub use destination::{select_destination, ForcedTarget};
pub use handlers::{ScanQuery, ScanState};
pub use routes::create_redirect_router;
