//! # Lock Manager
//!
//! Concurrency control over one database file follows a five-level lock
//! ladder, tracked in-process in a per-file [`LockTable`]:
//!
//! ```text
//! UNLOCKED ──► SHARED ──► RESERVED ──► PENDING ──► EXCLUSIVE
//! ```
//!
//! - Any number of connections may hold SHARED at once.
//! - At most one connection holds RESERVED or above; RESERVED coexists with
//!   other SHARED holders, so readers keep running while a writer buffers.
//! - PENDING blocks new SHARED requests, draining readers so the writer can
//!   reach EXCLUSIVE without starving.
//! - EXCLUSIVE requires being the only connection on the file.
//!
//! Acquisition is always non-blocking: an attempt either succeeds, fails
//! because contention (`Ok(false)`), or fails because the request is an
//! illegal ladder transition (`Err`, a usage bug). The busy-retry loop in
//! [`busy`] turns contention into delays or handler callbacks per the
//! connection's policy.
//!
//! WAL mode uses the same table differently: readers take SHARED only and
//! writers serialize on a dedicated WAL writer flag, so a WAL writer never
//! blocks readers.

mod busy;
mod table;

pub use busy::{retry_delay, BusyPolicy};
pub use table::{LockLevel, LockTable};
