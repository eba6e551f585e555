//! Asset boundary
//!
//! Loading happens off the main thread elsewhere; this module only provides
//! the channel results come back through. Anything received here may be
//! handed to the scene, which must only ever be touched from the main
//! thread.

pub mod handoff;

pub use handoff::{HandoffQueue, HandoffSender, MainThreadTask};
