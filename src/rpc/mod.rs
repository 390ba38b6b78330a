//! External collaborators, consumed as typed RPC interfaces only (spec §1,
//! §6): the libp2p peer-RPC transport, and the escrow/guard gRPC service
//! clients. Each submodule defines the trait boundary plus one concrete
//! reqwest-backed adapter — not a production libp2p/tonic stack, which is
//! explicitly out of this repo's scope.

pub mod escrow;
pub mod guard;
pub mod peer;
