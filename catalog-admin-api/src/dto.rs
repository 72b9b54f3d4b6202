pub mod product;
pub mod security;

pub use product::*;
pub use security::*;
