pub mod backends;
pub mod clients;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod torrents;

pub use routes::create_router;
