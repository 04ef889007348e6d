//! HTTP handlers: the proxy engine, the task query surface, the admin
//! surface and health/metrics endpoints.

pub mod admin;
pub mod health;
pub mod proxy;
pub mod tasks;
