mod executor;

pub use executor::{Executor, Scope, TaskError};
