#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use opa_exporter_core as core;
pub use opa_exporter_k8s as k8s;

mod args;
mod collector;
mod duration;

pub use self::{args::Args, duration::CliDuration};
