// Library exports so integration tests and benchmarks can drive the proxy
// without going through the binary.

pub mod admin;
pub mod cache;
pub mod compression;
pub mod config;
pub mod logging;
pub mod overrides;
pub mod proxy;
