pub mod ids;
pub mod principal;
pub mod security_event;
pub mod validation;

pub use ids::*;
pub use principal::*;
pub use security_event::*;
pub use validation::*;
