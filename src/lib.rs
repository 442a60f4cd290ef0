#[macro_use]
extern crate tracing;

pub mod backend;
pub mod bluewm;
pub mod cli;
pub mod control;
pub mod cursor;
pub mod handlers;
pub mod input;
pub mod ipc;
pub mod outputs;
pub mod protocols;
pub mod scene;
pub mod session;
pub mod shell;
pub mod surfaces;
pub mod utils;

#[cfg(test)]
mod test_utils;
