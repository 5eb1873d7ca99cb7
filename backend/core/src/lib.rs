//! Core data model shared by every ModHost crate: catalog descriptors, live
//! host state snapshots, slot queries and the error taxonomy.

pub mod error;
pub mod types;

pub use error::{BridgeError, BrokerError, LoadFailure, MalformedContribution, ModHostError};
pub use types::{
    slot_names, Camera, EntityRef, LoadReport, ModuleDescriptor, Session, SharedName, SlotQuery,
    ViewerState, Visibility,
};
