//! HTTP boundary: the streaming scan endpoints and the small JSON
//! endpoints around them.

pub mod routes;
pub mod stream;

pub use routes::router;
