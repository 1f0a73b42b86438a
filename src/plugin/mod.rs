//! Plugin ABI, reflection, and the process-lifetime registry of loaded
//! libraries.

pub mod abi;
pub mod descriptor;
pub mod registry;

pub use descriptor::{DefaultHint, DefaultSpec, PluginDescriptor, PortDeclaration, PortKind};
pub use registry::{PluginLibrary, PluginRegistry, PluginSource};
