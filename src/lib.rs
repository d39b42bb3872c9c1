pub mod arena;
pub mod builder;
pub mod cache;
pub mod context;
pub mod error;
pub mod functions;
pub mod learner;
pub mod model;
pub mod problem;
pub mod samples;
pub mod search_space;
pub mod types;

pub use error::{Error, Result};
