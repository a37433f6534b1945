pub mod pgguard;

pub use crate::pgguard::*;
