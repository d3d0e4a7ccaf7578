//! umi-services — agents that sit on a UMI: the reference memory responder,
//! bus bridges, the link-layer endpoints with their bring-up controller, and
//! the ordering scoreboard used to check them.

pub mod bridge;
pub mod link;
pub mod memory;
pub mod responder;
pub mod scoreboard;

pub use bridge::{Admission, Bridge, BridgeError, BusAdapter};
pub use link::{LinkController, LinkEndpoint, LinkError, LinkState, LoopbackSideband, SidebandPort};
pub use memory::{MemoryResponder, SparseMemory};
pub use responder::{Responder, ResponderError, ResponderTask};
pub use scoreboard::{Scoreboard, ScoreboardError};
