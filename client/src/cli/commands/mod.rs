mod listen;
mod record;

pub use listen::listen;
pub use record::{delete, get, init, set};
