mod dead_letter;
mod delivery;
mod dispatch;
mod sweep;

pub use dead_letter::*;
pub use delivery::*;
pub use dispatch::*;
pub use sweep::*;
