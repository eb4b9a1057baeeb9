#![recursion_limit = "128"]

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate slog;

pub mod config;
pub mod errors;
pub mod mediators;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod queue;
pub mod supervisor;
pub mod time_helpers;
pub mod web;

// Generated file: skip rustfmt
#[cfg_attr(rustfmt, rustfmt_skip)]
pub mod schema;

#[cfg(test)]
mod test_helpers;
