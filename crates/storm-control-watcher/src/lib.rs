//! Interface discovery and the per-interface block/unblock state
//! machine that sit on top of the XDP program.

pub mod interfaces;
pub mod netdev;
pub mod supervisor;

pub use interfaces::{InterfaceLister, InterfaceSource};
pub use netdev::NetDevWatcher;
pub use supervisor::Supervisor;
