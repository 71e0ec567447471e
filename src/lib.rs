pub mod config;
pub mod error;
pub mod identity;
pub mod introspect;
pub mod loader;
pub mod protocol;
pub mod routes;
pub mod script;
pub mod session;
pub mod store;
pub mod surface;
pub mod toolchain;
pub mod web_server;
