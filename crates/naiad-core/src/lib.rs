//! Naiad Core
//!
//! Shared foundation for the Naiad temporal knowledge-graph memory engine:
//! I/O abstractions, named constants, and the HTTP client trait the
//! LLM/embedding providers sit on.
//!
//! # TigerStyle
//!
//! This workspace follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `CANDIDATE_POOL_MAX`)
//! - Assertions on public entry points
//! - All time and randomness flows through providers so tests replay exactly

pub mod constants;
pub mod http;
pub mod io;

pub use constants::*;
pub use http::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, HttpResult, ReqwestHttpClient,
};
pub use io::{IoContext, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
