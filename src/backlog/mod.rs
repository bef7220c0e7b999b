mod error;
mod store;

pub use error::BacklogError;
pub use store::{commit, enumerate, generation_path, load_under_budget, write_generation, Generation};
