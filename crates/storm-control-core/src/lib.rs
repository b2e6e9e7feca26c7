//! Shared types and error handling for the storm-control daemon.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    DropConfig, InterfaceIndex, InterfaceInfo, InterfaceTable, PacketCounter, TrafficClass, TrafficCounters,
};
