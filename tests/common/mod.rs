pub mod factories;
pub mod platform;
pub mod strategies;

pub use factories::*;
pub use platform::*;
