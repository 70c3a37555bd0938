#[macro_use]
extern crate log;

pub mod collectors;
pub mod config;
pub mod evaluator;
pub mod reporter;
pub mod results;
pub mod rules;
pub mod ruleset;
pub mod runner;
