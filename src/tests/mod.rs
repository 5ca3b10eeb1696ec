//! End-to-end tests for the caching pipeline.
//!
//! The cache service and embedder are swapped for in-memory fakes; the
//! upstream is the real proxy pointed at a wiremock server, so the full
//! request path (body buffering, routing, header handling, forwarding)
//! is exercised.
