pub mod constants;
pub mod helpers;
pub mod logging;

pub use constants::*;
pub use helpers::*;
pub use logging::init_tracing;
