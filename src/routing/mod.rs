//! Routing state: the per-channel routing entities loaded from the store and
//! the pipeline configuration consumed by the data plane.

mod channel;
mod loader;
mod pipeline;
mod registry;
mod stream_to;
mod table;
mod tracker;
pub use channel::*;
pub use loader::*;
pub use pipeline::*;
pub use registry::*;
pub use stream_to::*;
pub use table::*;
pub use tracker::*;
