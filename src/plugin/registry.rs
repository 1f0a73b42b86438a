//! Opens plugin shared libraries and keeps the process-lifetime registry of
//! their descriptors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use log::{debug, info};

use crate::error::HostError;

use super::abi::{DescriptorFn, RawPluginDescriptor, PLUGIN_DESCRIPTOR_SYMBOL};
use super::descriptor::PluginDescriptor;

/// One loaded shared object. Kept open for the rest of the process: a
/// library's plugins remain instantiable for as long as the registry lives.
pub struct PluginLibrary {
    pub path: PathBuf,
    #[allow(dead_code)] // kept alive so descriptor/entry-point pointers stay valid
    library: Library,
    pub descriptor_ids: Vec<u64>,
}

impl PluginLibrary {
    /// Opens `path` and enumerates every descriptor it exports, from index
    /// zero until the enumeration symbol returns null.
    pub fn open(path: &Path) -> Result<(Self, Vec<PluginDescriptor>), HostError> {
        let library = unsafe { Library::new(path) }.map_err(|e| HostError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let descriptor_fn: Symbol<DescriptorFn> =
            unsafe { library.get(PLUGIN_DESCRIPTOR_SYMBOL) }.map_err(|e| HostError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut descriptors = Vec::new();
        let mut ids = Vec::new();
        let mut index = 0u64;
        loop {
            let raw: *const RawPluginDescriptor = unsafe { descriptor_fn(index) };
            if raw.is_null() {
                break;
            }
            let descriptor = unsafe { PluginDescriptor::from_raw(raw) };
            ids.push(descriptor.id);
            descriptors.push(descriptor);
            index += 1;
        }
        debug!(
            "loaded {} descriptor(s) from {}",
            descriptors.len(),
            path.display()
        );

        Ok((
            PluginLibrary {
                path: path.to_path_buf(),
                library,
                descriptor_ids: ids,
            },
            descriptors,
        ))
    }
}

/// Trait seam between the registry and the mechanism used to open a shared
/// library, so chain/effect construction can be tested without a real
/// `.so` on disk.
pub trait PluginSource {
    fn open(&self, path: &Path) -> Result<(PluginLibrary, Vec<PluginDescriptor>), HostError>;
}

/// Opens real shared objects via `libloading`.
pub struct DynamicPluginSource;

impl PluginSource for DynamicPluginSource {
    fn open(&self, path: &Path) -> Result<(PluginLibrary, Vec<PluginDescriptor>), HostError> {
        PluginLibrary::open(path)
    }
}

/// Owns every loaded plugin library for the life of the process and
/// indexes their descriptors by name and id. Names must be unique across
/// all loaded libraries.
pub struct PluginRegistry {
    source: Box<dyn PluginSource>,
    libraries: Vec<PluginLibrary>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u64, usize>,
    descriptors: Vec<PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::with_source(Box::new(DynamicPluginSource))
    }

    pub fn with_source(source: Box<dyn PluginSource>) -> Self {
        PluginRegistry {
            source,
            libraries: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            descriptors: Vec::new(),
        }
    }

    /// Loads `path` and registers every descriptor it exports. Fails with
    /// `DuplicateRegistration` if any descriptor's name or id collides with
    /// one already registered.
    pub fn load(&mut self, path: &Path) -> Result<(), HostError> {
        let (library, descriptors) = self.source.open(path)?;
        for descriptor in &descriptors {
            if self.by_name.contains_key(&descriptor.name) {
                return Err(HostError::DuplicateRegistration {
                    kind: "name",
                    name: descriptor.name.clone(),
                });
            }
            if self.by_id.contains_key(&descriptor.id) {
                return Err(HostError::DuplicateRegistration {
                    kind: "id",
                    name: descriptor.id.to_string(),
                });
            }
        }
        info!(
            "registering {} plugin(s) from {}",
            descriptors.len(),
            path.display()
        );
        for descriptor in descriptors {
            let slot = self.descriptors.len();
            self.by_name.insert(descriptor.name.clone(), slot);
            self.by_id.insert(descriptor.id, slot);
            self.descriptors.push(descriptor);
        }
        self.libraries.push(library);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Result<&PluginDescriptor, HostError> {
        self.by_name
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| HostError::UnknownPlugin(name.to_string()))
    }

    pub fn get_by_id(&self, id: u64) -> Result<&PluginDescriptor, HostError> {
        self.by_id
            .get(&id)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| HostError::UnknownPlugin(id.to_string()))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Test-only seam: builds descriptors in-process instead of through
/// `libloading`, so registry/chain/effect behaviour can be exercised
/// without a compiled `.so` fixture. Available to unit tests unconditionally
/// and to integration tests via the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::ffi::{CStr, CString};
    use std::os::raw::c_ulong;

    use crate::plugin::abi::{
        PluginHandle, RawDefaultHint, RawPluginDescriptor, RawPortDescriptor, RawPortFlags,
        RawPortRangeHint,
    };

    /// Leaks a small set of CStrings/arrays to build a `'static`-lifetime
    /// raw descriptor, mirroring how a real shared library's descriptor
    /// data lives for the process lifetime.
    pub struct MockDescriptorBuilder {
        name: CString,
        unique_id: u64,
        ports: Vec<(CString, RawPortFlags, Option<(f32, f32, bool, RawDefaultHint)>)>,
    }

    impl MockDescriptorBuilder {
        pub fn new(name: &str, unique_id: u64) -> Self {
            MockDescriptorBuilder {
                name: CString::new(name).unwrap(),
                unique_id,
                ports: Vec::new(),
            }
        }

        pub fn audio_input(mut self, name: &str) -> Self {
            self.ports
                .push((CString::new(name).unwrap(), RawPortFlags(RawPortFlags::AUDIO | RawPortFlags::INPUT), None));
            self
        }

        pub fn audio_output(mut self, name: &str) -> Self {
            self.ports
                .push((CString::new(name).unwrap(), RawPortFlags(RawPortFlags::AUDIO | RawPortFlags::OUTPUT), None));
            self
        }

        pub fn control_input(
            mut self,
            name: &str,
            lower: f32,
            upper: f32,
            hint: RawDefaultHint,
        ) -> Self {
            self.ports.push((
                CString::new(name).unwrap(),
                RawPortFlags(RawPortFlags::CONTROL | RawPortFlags::INPUT),
                Some((lower, upper, false, hint)),
            ));
            self
        }

        pub fn build(self) -> *const RawPluginDescriptor {
            let mut raw_ports = Vec::with_capacity(self.ports.len());
            for (name, flags, range) in self.ports {
                let range_hint = match range {
                    Some((lower, upper, log, hint)) => RawPortRangeHint {
                        has_range: 1,
                        lower_bound: lower,
                        upper_bound: upper,
                        logarithmic: log as u8,
                        default_hint: hint,
                    },
                    None => RawPortRangeHint {
                        has_range: 0,
                        lower_bound: 0.0,
                        upper_bound: 0.0,
                        logarithmic: 0,
                        default_hint: RawDefaultHint::None,
                    },
                };
                // Leak each port name so its storage outlives this call;
                // the real shared-library case has the same lifetime
                // (string data living in the library's .rodata section).
                let name_ptr = name.as_ptr();
                std::mem::forget(name);
                raw_ports.push(RawPortDescriptor {
                    name: name_ptr,
                    flags,
                    range_hint,
                });
            }
            let port_count = raw_ports.len() as c_ulong;
            let ports_ptr = Box::leak(raw_ports.into_boxed_slice()).as_ptr();
            let name_ptr = self.name.as_ptr();
            std::mem::forget(self.name);

            let descriptor = Box::new(RawPluginDescriptor {
                unique_id: self.unique_id,
                name: name_ptr,
                port_count,
                ports: ports_ptr,
                instantiate: mock_instantiate,
                connect_port: mock_connect_port,
                activate: Some(mock_activate),
                run: mock_run,
                deactivate: Some(mock_deactivate),
                cleanup: Some(mock_cleanup),
            });
            Box::leak(descriptor) as *const _
        }
    }

    /// Behaviour a mock instance runs, selected from the descriptor's name
    /// at instantiation time. Port index 0 is always the single audio
    /// input and index 1 the single audio output (the order
    /// `MockDescriptorBuilder` adds them in every test); `Amp` additionally
    /// reads its gain from control port index 2.
    enum MockBehavior {
        Identity,
        Amp,
    }

    struct MockHandleState {
        behavior: MockBehavior,
        ports: Vec<*mut f32>,
    }

    unsafe extern "C" fn mock_instantiate(
        descriptor: *const RawPluginDescriptor,
        _sample_rate: c_ulong,
    ) -> PluginHandle {
        let d = &*descriptor;
        let name = CStr::from_ptr(d.name).to_string_lossy();
        let behavior = if name.contains("Amp") {
            MockBehavior::Amp
        } else {
            MockBehavior::Identity
        };
        let state = Box::new(MockHandleState {
            behavior,
            ports: vec![std::ptr::null_mut(); d.port_count as usize],
        });
        Box::into_raw(state) as PluginHandle
    }

    unsafe extern "C" fn mock_connect_port(handle: PluginHandle, port: c_ulong, data: *mut f32) {
        let state = &mut *(handle as *mut MockHandleState);
        state.ports[port as usize] = data;
    }

    unsafe extern "C" fn mock_activate(_handle: PluginHandle) {}
    unsafe extern "C" fn mock_deactivate(_handle: PluginHandle) {}
    unsafe extern "C" fn mock_cleanup(handle: PluginHandle) {
        drop(Box::from_raw(handle as *mut MockHandleState));
    }

    /// `Identity` copies its input onto its output sample-for-sample;
    /// `Amp` multiplies by its gain control. Good enough to exercise
    /// wiring, fan-out, and chain ordering end to end without a compiled
    /// shared-library fixture.
    unsafe extern "C" fn mock_run(handle: PluginHandle, sample_count: c_ulong) {
        let state = &*(handle as *mut MockHandleState);
        let input = state.ports[0];
        let output = state.ports[1];
        if input.is_null() || output.is_null() {
            return;
        }
        let n = sample_count as usize;
        let in_slice = std::slice::from_raw_parts(input, n);
        let out_slice = std::slice::from_raw_parts_mut(output, n);
        match state.behavior {
            MockBehavior::Identity => out_slice.copy_from_slice(in_slice),
            MockBehavior::Amp => {
                let gain = if state.ports.len() > 2 && !state.ports[2].is_null() {
                    *state.ports[2]
                } else {
                    1.0
                };
                for (o, i) in out_slice.iter_mut().zip(in_slice.iter()) {
                    *o = i * gain;
                }
            }
        }
    }

    pub struct MockSource {
        pub descriptors: Vec<*const RawPluginDescriptor>,
    }

    impl PluginSource for MockSource {
        fn open(&self, path: &Path) -> Result<(PluginLibrary, Vec<PluginDescriptor>), HostError> {
            let descriptors: Vec<PluginDescriptor> = self
                .descriptors
                .iter()
                .map(|&raw| unsafe { PluginDescriptor::from_raw(raw) })
                .collect();
            let ids = descriptors.iter().map(|d| d.id).collect();
            // A mock library has no real `libloading::Library`; the registry
            // never dereferences `library` directly, only keeps it alive, so
            // we load the current executable itself as an inert handle.
            let library = unsafe { Library::new(std::env::current_exe().unwrap()) }.unwrap();
            Ok((
                PluginLibrary {
                    path: path.to_path_buf(),
                    library,
                    descriptor_ids: ids,
                },
                descriptors,
            ))
        }
    }

    #[test]
    fn mock_descriptor_round_trips_ports() {
        let raw = MockDescriptorBuilder::new("identity", 1)
            .audio_input("Input")
            .audio_output("Output")
            .control_input("Gain", 0.0, 2.0, RawDefaultHint::Middle)
            .build();
        let descriptor = unsafe { PluginDescriptor::from_raw(raw) };
        assert_eq!(descriptor.name, "identity");
        assert_eq!(descriptor.ports.len(), 3);
        assert_eq!(descriptor.port_by_name("Gain").unwrap().default.unwrap().compute(), 1.0);
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let raw = MockDescriptorBuilder::new("dup", 1).audio_input("In").build();
        let mut registry = PluginRegistry::with_source(Box::new(MockSource {
            descriptors: vec![raw],
        }));
        registry.load(Path::new("dup.so")).unwrap();
        let err = registry.load(Path::new("dup2.so")).unwrap_err();
        assert!(matches!(err, HostError::DuplicateRegistration { .. }));
    }

    #[test]
    fn unknown_plugin_name_is_an_error() {
        let registry = PluginRegistry::with_source(Box::new(MockSource { descriptors: vec![] }));
        assert!(matches!(
            registry.get_by_name("missing"),
            Err(HostError::UnknownPlugin(_))
        ));
    }
}
