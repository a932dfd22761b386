pub mod cli;
pub mod config;
mod db;
pub mod error;
pub mod features;
pub mod index;
pub mod pipeline;
pub mod searcher;
mod server;
pub mod stego;
mod utils;

pub use config::Opts;
pub use searcher::Searcher;
