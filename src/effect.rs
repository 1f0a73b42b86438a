//! One instantiated plugin: control storage, buffer bindings, and the
//! activate/run lifecycle.

use std::sync::Mutex;

use crate::error::HostError;
use crate::plugin::abi::{PluginHandle, RawPluginDescriptor};
use crate::plugin::{PluginDescriptor, PortKind};

/// Guarded, mutable state of one effect instance: the per-port control
/// values and the currently-bound audio buffer pointers. Held behind the
/// effect's own lock so `run` can serialize itself against concurrent
/// control reads/writes without the caller having to coordinate anything.
struct Guarded {
    controls: Vec<f32>,
    audio_buffers: Vec<*mut f32>,
    activated: bool,
}

// SAFETY: all access to `Guarded` goes through `EffectInstance`'s `lock`,
// and the raw buffer pointers it holds are either null or point at buffers
// owned by the chain for the duration of one realtime cycle.
unsafe impl Send for Guarded {}

/// One instantiated plugin. `connect`/`disconnect`/`set_control`/
/// `get_control`/`nudge` may be called from any thread; `run` takes the
/// lock itself rather than requiring the caller to hold it, so a chain's
/// realtime path never blocks on anything but this single, uncontended
/// acquisition per effect per cycle.
pub struct EffectInstance {
    name: String,
    descriptor: &'static PluginDescriptor,
    handle: PluginHandle,
    guarded: Mutex<Guarded>,
}

// SAFETY: `PluginHandle` is an opaque pointer into plugin-owned memory; the
// plugin ABI contract requires its methods be safe to call from a single
// thread at a time, which `guarded`'s mutex enforces.
unsafe impl Send for EffectInstance {}
unsafe impl Sync for EffectInstance {}

impl EffectInstance {
    /// Instantiates `descriptor` at `sample_rate`, binding every control
    /// input to its computed default and leaving every audio port
    /// unconnected (null).
    ///
    /// # Safety
    ///
    /// `descriptor` must outlive the returned instance (its owning
    /// registry is never torn down before the processor is).
    pub unsafe fn instantiate(
        name: &str,
        descriptor: &'static PluginDescriptor,
        sample_rate: u64,
    ) -> Self {
        let raw: &RawPluginDescriptor = &*descriptor.raw;
        let handle = (raw.instantiate)(descriptor.raw, sample_rate);

        let mut controls = vec![0.0f32; descriptor.ports.len()];
        let mut audio_buffers = vec![std::ptr::null_mut(); descriptor.ports.len()];
        for port in &descriptor.ports {
            match port.kind {
                PortKind::ControlInput => {
                    let value = port.default.map(|d| d.compute()).unwrap_or(0.0);
                    controls[port.index] = value;
                    (raw.connect_port)(handle, port.index as u64, &mut controls[port.index]);
                }
                PortKind::ControlOutput => {
                    (raw.connect_port)(handle, port.index as u64, &mut controls[port.index]);
                }
                PortKind::AudioInput | PortKind::AudioOutput => {
                    audio_buffers[port.index] = std::ptr::null_mut();
                    (raw.connect_port)(handle, port.index as u64, std::ptr::null_mut());
                }
            }
        }

        EffectInstance {
            name: name.to_string(),
            descriptor,
            handle,
            guarded: Mutex::new(Guarded {
                controls,
                audio_buffers,
                activated: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        self.descriptor
    }

    fn find_control_port(&self, name: &str, want_input: bool) -> Result<usize, HostError> {
        self.descriptor
            .port_by_name(name)
            .filter(|p| {
                (want_input && p.kind == PortKind::ControlInput)
                    || (!want_input && p.kind == PortKind::ControlOutput)
            })
            .map(|p| p.index)
            .ok_or_else(|| HostError::UnknownPort(name.to_string()))
    }

    pub fn set_control(&self, name: &str, value: f32) -> Result<(), HostError> {
        let index = self.find_control_port(name, true)?;
        let mut guard = self.guarded.lock().expect("effect lock poisoned");
        guard.controls[index] = value;
        Ok(())
    }

    pub fn get_control(&self, name: &str) -> Result<f32, HostError> {
        let index = self
            .descriptor
            .port_by_name(name)
            .filter(|p| p.kind == PortKind::ControlInput || p.kind == PortKind::ControlOutput)
            .map(|p| p.index)
            .ok_or_else(|| HostError::UnknownPort(name.to_string()))?;
        let guard = self.guarded.lock().expect("effect lock poisoned");
        Ok(guard.controls[index])
    }

    /// Atomically reads, adds `delta`, and returns the control's new value.
    pub fn nudge(&self, name: &str, delta: f32) -> Result<f32, HostError> {
        let index = self.find_control_port(name, true)?;
        let mut guard = self.guarded.lock().expect("effect lock poisoned");
        guard.controls[index] += delta;
        Ok(guard.controls[index])
    }

    fn audio_port_index(&self, name: &str) -> Result<usize, HostError> {
        self.descriptor
            .port_by_name(name)
            .filter(|p| p.kind.is_audio())
            .map(|p| p.index)
            .ok_or_else(|| HostError::UnknownPort(name.to_string()))
    }

    /// Binds the named audio port to `buffer`. `buffer` must remain valid
    /// until the next `connect`/`disconnect` of the same port.
    pub fn connect(&self, name: &str, buffer: *mut f32) -> Result<(), HostError> {
        let index = self.audio_port_index(name)?;
        let raw: &RawPluginDescriptor = unsafe { &*self.descriptor.raw };
        let mut guard = self.guarded.lock().expect("effect lock poisoned");
        guard.audio_buffers[index] = buffer;
        unsafe { (raw.connect_port)(self.handle, index as u64, buffer) };
        Ok(())
    }

    pub fn disconnect(&self, name: &str) -> Result<(), HostError> {
        self.connect(name, std::ptr::null_mut())
    }

    /// Activates the plugin. Fails with `NotFullyConnected` if any audio
    /// port still has a null buffer. One-way: a second call is a no-op and
    /// does not re-invoke the plugin's `activate` hook.
    pub fn activate(&self) -> Result<(), HostError> {
        let raw: &RawPluginDescriptor = unsafe { &*self.descriptor.raw };
        let mut guard = self.guarded.lock().expect("effect lock poisoned");
        if guard.activated {
            return Ok(());
        }
        if guard
            .audio_buffers
            .iter()
            .enumerate()
            .any(|(i, &ptr)| self.descriptor.ports[i].kind.is_audio() && ptr.is_null())
        {
            return Err(HostError::NotFullyConnected(self.name.clone()));
        }
        if let Some(activate_fn) = raw.activate {
            unsafe { activate_fn(self.handle) };
        }
        guard.activated = true;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.guarded.lock().expect("effect lock poisoned").activated
    }

    /// Realtime: invokes the plugin's process hook for exactly
    /// `sample_count` samples against the currently bound buffers. Takes
    /// the effect lock itself so callers never hold it across `run`.
    pub fn run(&self, sample_count: u64) {
        let raw: &RawPluginDescriptor = unsafe { &*self.descriptor.raw };
        let _guard = self.guarded.lock().expect("effect lock poisoned");
        unsafe { (raw.run)(self.handle, sample_count) };
    }
}

impl Drop for EffectInstance {
    fn drop(&mut self) {
        let raw: &RawPluginDescriptor = unsafe { &*self.descriptor.raw };
        let guard = self.guarded.lock().expect("effect lock poisoned");
        if guard.activated {
            if let Some(deactivate_fn) = raw.deactivate {
                unsafe { deactivate_fn(self.handle) };
            }
        }
        if let Some(cleanup_fn) = raw.cleanup {
            unsafe { cleanup_fn(self.handle) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::abi::RawDefaultHint;
    use crate::plugin::registry::mock::MockDescriptorBuilder;

    fn leak_descriptor(name: &str) -> &'static PluginDescriptor {
        let raw = MockDescriptorBuilder::new(name, 42)
            .audio_input("Input")
            .audio_output("Output")
            .control_input("Gain", 0.0, 2.0, RawDefaultHint::Middle)
            .build();
        Box::leak(Box::new(unsafe { PluginDescriptor::from_raw(raw) }))
    }

    #[test]
    fn default_control_value_is_computed_on_instantiate() {
        let descriptor = leak_descriptor("gain1");
        let effect = unsafe { EffectInstance::instantiate("e", descriptor, 48_000) };
        assert_eq!(effect.get_control("Gain").unwrap(), 1.0);
    }

    #[test]
    fn activate_fails_until_every_audio_port_connected() {
        let descriptor = leak_descriptor("gain2");
        let effect = unsafe { EffectInstance::instantiate("e", descriptor, 48_000) };
        assert!(matches!(
            effect.activate(),
            Err(HostError::NotFullyConnected(_))
        ));
        let mut input_buf = [0.0f32; 4];
        let mut output_buf = [0.0f32; 4];
        effect.connect("Input", input_buf.as_mut_ptr()).unwrap();
        effect.connect("Output", output_buf.as_mut_ptr()).unwrap();
        assert!(effect.activate().is_ok());
        assert!(effect.is_active());
    }

    #[test]
    fn nudge_is_atomic_read_modify_write() {
        let descriptor = leak_descriptor("gain3");
        let effect = unsafe { EffectInstance::instantiate("e", descriptor, 48_000) };
        let before = effect.get_control("Gain").unwrap();
        let after = effect.nudge("Gain", 0.5).unwrap();
        assert_eq!(after, before + 0.5);
        assert_eq!(effect.get_control("Gain").unwrap(), after);
    }

    #[test]
    fn activate_is_idempotent() {
        let descriptor = leak_descriptor("gain6");
        let effect = unsafe { EffectInstance::instantiate("e", descriptor, 48_000) };
        let mut input_buf = [0.0f32; 4];
        let mut output_buf = [0.0f32; 4];
        effect.connect("Input", input_buf.as_mut_ptr()).unwrap();
        effect.connect("Output", output_buf.as_mut_ptr()).unwrap();
        effect.activate().unwrap();
        assert!(effect.activate().is_ok());
        assert!(effect.is_active());
    }

    #[test]
    fn unknown_port_name_is_an_error() {
        let descriptor = leak_descriptor("gain4");
        let effect = unsafe { EffectInstance::instantiate("e", descriptor, 48_000) };
        assert!(matches!(
            effect.set_control("Nope", 1.0),
            Err(HostError::UnknownPort(_))
        ));
    }

    #[test]
    fn reconnect_after_disconnect_restores_binding() {
        let descriptor = leak_descriptor("gain5");
        let effect = unsafe { EffectInstance::instantiate("e", descriptor, 48_000) };
        let mut buf = [1.0f32; 4];
        effect.connect("Input", buf.as_mut_ptr()).unwrap();
        effect.disconnect("Input").unwrap();
        effect.connect("Input", buf.as_mut_ptr()).unwrap();
        let mut out = [0.0f32; 4];
        effect.connect("Output", out.as_mut_ptr()).unwrap();
        assert!(effect.activate().is_ok());
    }
}
