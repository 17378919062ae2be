//! Gateway server implementation

mod router;
mod server;

pub use router::{create_router, protected_routes};
pub use server::Gateway;
