pub mod error;
pub mod local;
pub mod set;

pub use error::*;
pub use local::{LocalRegistrar, RegistrarMode};
pub use set::RegistrarSet;
