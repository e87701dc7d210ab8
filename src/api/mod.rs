//! Network surface of the service.

pub mod http;
