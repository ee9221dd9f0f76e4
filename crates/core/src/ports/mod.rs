mod executor;
mod pagination;

pub use executor::*;
pub use pagination::*;
