//! API Module
//!
//! HTTP handlers and routing for the demo service that consumes the cache
//! and lock layers.
//!
//! # Endpoints
//! - `PUT /set` - Store a value (no expiry, sliding TTL, or jittered deadline)
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `GET /exists/:key` - Check whether a key is cached
//! - `GET /standalone-lock/:key` - Cache-aside read with per-key local locking
//! - `GET /distributed-lock/:name` - Run guarded work under a distributed lock
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
