//! Thin wrappers over librdmacm and libibverbs.
//!
//! Every object here owns one native handle. Each of them offers an explicit, fallible release
//! method (`destroy`, `dealloc`, `dereg`) for callers that need to observe the outcome, and
//! falls back to releasing in `Drop`, where errors can only be logged.
#![allow(clippy::missing_safety_doc)]

pub mod ffi {
    #![allow(non_upper_case_globals)]
    #![allow(non_camel_case_types)]
    #![allow(non_snake_case)]
    #![allow(dead_code)]
    #![allow(clippy::all)]
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}

pub mod ibv;
pub mod mr;
pub mod rdmacm;
