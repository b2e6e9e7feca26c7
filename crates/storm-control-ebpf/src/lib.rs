//! Userspace control plane over the storm-control XDP program: typed
//! map access and program attach/detach lifecycle.

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod maps;
pub mod program;
mod wire;

pub use maps::MapClient;
pub use program::{ProgramHandle, XdpHandle, DROP_MAP_NAME, PROGRAM_NAME, STATS_MAP_NAME};

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeXdpHandle;
