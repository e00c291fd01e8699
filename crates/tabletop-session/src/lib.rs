//! Authority-side bookkeeping of who is connected and who is admitted.
//!
//! 1. **Credentials**: gate who may take the authority role
//!    ([`Authenticator`], [`StaticCredentials`]).
//! 2. **Connection registry**: every live guest channel, its approval
//!    flag and broadcast fan-out ([`ConnectionRegistry`]).
//! 3. **Admission**: pending join requests and the approve/deny
//!    transitions ([`AdmissionQueue`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Session runtime (above)  ← owns one registry and one queue per session
//!     ↕
//! Session layer (this crate)  ← identity, approval, fan-out
//!     ↕
//! Transport (below)  ← provides ConnectionId
//! ```
//!
//! Nothing here is thread-safe on purpose: both structures are owned by
//! the single authority task and mutated only from its event loop.

mod admission;
mod auth;
mod error;
mod registry;

pub use admission::{AdmissionQueue, JoinRequest, Submitted};
pub use auth::{Authenticator, StaticCredentials};
pub use error::SessionError;
pub use registry::{ConnectionRecord, ConnectionRegistry, Frame, Outbound, PeerSender, Role};
