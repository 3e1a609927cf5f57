//! SQLite-backed store for the lane work scheduler.
//!
//! One [`Session`] owns one connection and one clock offset. It implements the
//! registry, lease scheduler, work ledger and artifact store contracts from
//! `fleet-storage`.

mod artifacts;
mod ledger;
mod registry;
mod rows;
mod scheduler;
mod session;
mod stream;

pub use artifacts::{CHUNK_SIZE, MAX_UPLOAD_SIZE};
pub use session::{Session, SessionOptions};
pub use stream::FileStream;
