//! Request model shared by the ingress table and the relay handlers.
//!
//! - **`request`**: the request handed over by the tunnel transport, its
//!   builder, and the [`ConnectionType`](request::ConnectionType) tag
//! - **`headers`**: reserved header names and hop-by-hop filtering

pub mod headers;
pub mod request;
