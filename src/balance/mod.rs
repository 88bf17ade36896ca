//! Load-aware endpoint scheduling.

mod protocol;
mod scheduler;
mod server_info;
mod tree;
mod weight;
pub use protocol::*;
pub use scheduler::*;
pub use server_info::*;
pub use tree::*;
pub use weight::*;
