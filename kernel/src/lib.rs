// Mailcatch Kernel
//
// Address capture pipeline: validation, direct-append log, volatile
// buffer, snapshot chain, drain client and the HTTP surface.

pub mod buffer;
pub mod collector;
pub mod config;
pub mod drain;
pub mod http;
pub mod log;
pub mod snapshot;
pub mod validate;
