// src/api/mod.rs
// Thin axum HTTP surface implementing the request/response shapes of spec
// §6. No session/RBAC enforcement lives here (out of scope, §1) beyond
// pulling a `user_id` out of a header, which is the external auth
// decorator's documented contract with this layer.

pub mod http;
