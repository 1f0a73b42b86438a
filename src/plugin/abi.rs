//! Raw C ABI exposed by a plugin shared library.
//!
//! A library exports a single symbol, [`PLUGIN_DESCRIPTOR_SYMBOL`], of type
//! [`DescriptorFn`]: given an index starting at zero, it returns a pointer to
//! a [`RawPluginDescriptor`], or null once the index exceeds the library's
//! plugin count. All entry points are `extern "C"` and operate on an opaque
//! [`PluginHandle`].

use std::os::raw::{c_char, c_ulong};

/// Name of the symbol every plugin shared library must export.
pub const PLUGIN_DESCRIPTOR_SYMBOL: &[u8] = b"plugin_descriptor";

/// Opaque per-instance handle returned by [`InstantiateFn`] and threaded
/// through every other entry point.
#[repr(C)]
pub struct PluginHandleOpaque {
    _private: [u8; 0],
}

pub type PluginHandle = *mut PluginHandleOpaque;
pub type PortHandle = c_ulong;

/// Bit flags describing one port's direction and signal kind. Exactly one
/// of `AUDIO`/`CONTROL` and one of `INPUT`/`OUTPUT` must be set.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPortFlags(pub u32);

impl RawPortFlags {
    pub const INPUT: u32 = 1 << 0;
    pub const OUTPUT: u32 = 1 << 1;
    pub const CONTROL: u32 = 1 << 2;
    pub const AUDIO: u32 = 1 << 3;

    pub fn is_input(self) -> bool {
        self.0 & Self::INPUT != 0
    }
    pub fn is_output(self) -> bool {
        self.0 & Self::OUTPUT != 0
    }
    pub fn is_control(self) -> bool {
        self.0 & Self::CONTROL != 0
    }
    pub fn is_audio(self) -> bool {
        self.0 & Self::AUDIO != 0
    }
}

/// Default-value hint bits, mirrored from the closed set in the data model.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDefaultHint {
    None = 0,
    Zero = 1,
    One = 2,
    OneHundred = 3,
    FourForty = 4,
    Minimum = 5,
    Low = 6,
    Middle = 7,
    High = 8,
    Maximum = 9,
}

/// Range/default metadata for one port, valid only when the port is a
/// control input.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPortRangeHint {
    pub has_range: u8,
    pub lower_bound: f32,
    pub upper_bound: f32,
    pub logarithmic: u8,
    pub default_hint: RawDefaultHint,
}

/// One port declaration as exported by the plugin library.
#[repr(C)]
pub struct RawPortDescriptor {
    pub name: *const c_char,
    pub flags: RawPortFlags,
    pub range_hint: RawPortRangeHint,
}

pub type ActivateFn = unsafe extern "C" fn(handle: PluginHandle);
pub type RunFn = unsafe extern "C" fn(handle: PluginHandle, sample_count: c_ulong);
pub type DeactivateFn = unsafe extern "C" fn(handle: PluginHandle);
pub type CleanupFn = unsafe extern "C" fn(handle: PluginHandle);
pub type ConnectPortFn =
    unsafe extern "C" fn(handle: PluginHandle, port: PortHandle, data: *mut f32);
pub type InstantiateFn =
    unsafe extern "C" fn(descriptor: *const RawPluginDescriptor, sample_rate: c_ulong) -> PluginHandle;

/// Immutable metadata for one plugin type, as reflected from the shared
/// library. The pointers here are valid for the lifetime of the owning
/// library (never unloaded).
#[repr(C)]
pub struct RawPluginDescriptor {
    pub unique_id: c_ulong,
    pub name: *const c_char,
    pub port_count: c_ulong,
    pub ports: *const RawPortDescriptor,
    pub instantiate: InstantiateFn,
    pub connect_port: ConnectPortFn,
    pub activate: Option<ActivateFn>,
    pub run: RunFn,
    pub deactivate: Option<DeactivateFn>,
    pub cleanup: Option<CleanupFn>,
}

/// Signature of the well-known exported enumeration symbol.
pub type DescriptorFn = unsafe extern "C" fn(index: c_ulong) -> *const RawPluginDescriptor;
