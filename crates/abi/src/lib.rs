pub mod decode;
pub mod normalize;
pub mod registry;

pub use decode::{DecodeError, DecodedEvent};
pub use registry::{AbiRegistry, EventDef};
