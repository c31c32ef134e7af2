//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 front end with keep-alive, enough to sit on the dev
//! server port and hand matching requests to the proxy.
//!
//! # Architecture
//!
//! - **`chunked`**: chunked transfer-coding decoder
//! - **`connection`**: per-client state machine, routes each request
//! - **`parser`**: parses incoming HTTP requests from byte buffers
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: serializes and writes responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route: forward, tunnel, or 404
//!        └──────┬───────────┘
//!               │ Response ready          (WebSocket upgrade → tunnel → Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod chunked;
pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
