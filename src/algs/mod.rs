//! Distribution, face construction and the communication plumbing they share.

pub mod adapter;
pub mod communicator;
pub mod distribute;
pub mod exchange;
pub mod faces;
pub mod linalg;
pub mod send_receive;
pub mod wire;

pub use distribute::{DistributedMesh, InMemorySourceMesh, MeshDistributor, SourceMesh};
pub use faces::FaceBuilder;
pub use send_receive::HaloExchangePattern;
