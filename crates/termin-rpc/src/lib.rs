//! termin-rpc — the public JSON-RPC 2.0 facade.
//!
//! Maps method names to engine handlers, turns [`ApiError`] kinds into
//! JSON-RPC error objects carrying the protocol's numeric codes, and serves
//! the whole surface over HTTP with permissive CORS.
//!
//! [`ApiError`]: termin_core::error::ApiError

pub mod api;
pub mod server;

pub use server::RpcServer;
