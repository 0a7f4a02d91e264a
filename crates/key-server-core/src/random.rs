mod interface;
mod os;

pub use interface::*;
pub use os::*;
