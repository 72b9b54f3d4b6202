pub mod products;
pub mod security;
