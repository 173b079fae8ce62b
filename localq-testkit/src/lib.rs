//! Fixtures shared by the localq integration tests and benches.

mod command;
mod mock;
mod store;

pub use command::*;
pub use mock::*;
pub use store::*;
