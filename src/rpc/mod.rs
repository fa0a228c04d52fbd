//! Tree synchronization over a framed byte stream.
//!
//! Layering, bottom to top:
//!
//! - [`protocol`]: frame format, session messages and patch records.
//! - [`cache`]: the per-connection reference cache both sides grow in
//!   lockstep; it is what turns an unchanged subtree into four bytes.
//! - [`send`] / [`receive`]: deterministic pre-order walks that diff and
//!   rebuild trees. The two walks must mirror each other exactly; record
//!   order is the only correlation on the wire.
//! - [`codec`]: per-language field walks behind the [`codec::TreeCodec`]
//!   trait, dispatched by source-file type.
//! - [`session`]: handshake, per-file exchange and error reporting for
//!   both ends of a connection.

pub mod cache;
pub mod codec;
pub mod protocol;
pub mod receive;
pub mod send;
pub mod session;

pub use cache::RefCache;
pub use codec::{CodecRegistry, JsonCodec, SourceFileType, TreeCodec};
pub use protocol::{HelloFlags, ListOp, Record, Scalar, PROTOCOL_VERSION};
pub use receive::ReceiveQueue;
pub use send::{SendQueue, SendStats};
pub use session::{BatchReport, FileOutcome, FileStatus, PushSession, ServeSession, ServeSummary};
