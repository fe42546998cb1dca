//! Locking primitives used by the event loop.
//!
//! These are thin layers over `parking_lot`. The mutex hands out scoped locks only, so a lock is
//! released on every exit path including unwinding, and the condition carries a single sticky
//! "signalled" flag instead of relying on the caller to re-check a predicate.

mod condition;
mod mutex;

pub use condition::*;
pub use mutex::*;
