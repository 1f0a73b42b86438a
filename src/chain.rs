//! An ordered DSP graph: effects wired together by shared buffers, with
//! routes to the audio server's external ports.

use indexmap::IndexMap;

use crate::effect::EffectInstance;
use crate::error::HostError;
use crate::plugin::PluginRegistry;

/// One audio output's fan-out to one or more destination audio inputs,
/// backed by a single owned buffer.
struct Wire {
    source_effect: String,
    source_port: String,
    destinations: Vec<(String, String)>,
    buffer: Box<[f32]>,
}

/// Binds one effect audio port to a named external (audio-server) port.
pub struct Route {
    pub effect_name: String,
    pub port_name: String,
    pub external_port: String,
}

/// A named, ordered DSP graph. Effects run in the order they were added;
/// the processor requires that order to already be a valid topological
/// order of the intra-chain wires (no sort is computed at run time).
pub struct Chain {
    name: String,
    effects: IndexMap<String, EffectInstance>,
    wires: Vec<Wire>,
    routes: Vec<Route>,
    /// One scratch buffer per route, connected at construction time so
    /// `activate`'s not-fully-connected check passes before the audio
    /// server has supplied any real buffers. `run` rebinds each route to
    /// the server's live buffer for the cycle, then rebinds back to this
    /// scratch buffer afterward, since the server does not guarantee a
    /// port's buffer pointer is stable across cycles.
    route_scratch: Vec<Box<[f32]>>,
    max_frames: usize,
    activated: bool,
}

/// Parses a `"effect.port"` wire target.
fn parse_target(spec: &str) -> Result<(&str, &str), HostError> {
    spec.split_once('.')
        .filter(|(e, p)| !e.is_empty() && !p.is_empty())
        .ok_or_else(|| HostError::MalformedWireSpec(spec.to_string()))
}

impl Chain {
    pub fn new(name: &str, max_frames: usize) -> Self {
        Chain {
            name: name.to_string(),
            effects: IndexMap::new(),
            wires: Vec::new(),
            routes: Vec::new(),
            route_scratch: Vec::new(),
            max_frames,
            activated: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instantiates `plugin_type` from `registry` under `effect_name` and
    /// adds it to the chain's run order. Fails with `DuplicateEffect` if
    /// the name is already taken.
    pub fn add_effect(
        &mut self,
        effect_name: &str,
        plugin_type: &str,
        registry: &'static PluginRegistry,
        sample_rate: u64,
    ) -> Result<(), HostError> {
        if self.effects.contains_key(effect_name) {
            return Err(HostError::DuplicateEffect(effect_name.to_string()));
        }
        let descriptor = registry.get_by_name(plugin_type)?;
        // SAFETY: `registry` is `'static` (owned by the processor for the
        // whole run), so the descriptor it hands out outlives this chain.
        let instance = unsafe { EffectInstance::instantiate(effect_name, descriptor, sample_rate) };
        self.effects.insert(effect_name.to_string(), instance);
        Ok(())
    }

    pub fn get_effect(&self, name: &str) -> Result<&EffectInstance, HostError> {
        self.effects
            .get(name)
            .ok_or_else(|| HostError::UnknownEffect(name.to_string()))
    }

    fn resolve<'a>(&'a self, spec: &'a str) -> Result<(&'a EffectInstance, &'a str), HostError> {
        let (effect_name, port_name) = parse_target(spec)?;
        let effect = self
            .effects
            .get(effect_name)
            .ok_or_else(|| HostError::MalformedWireSpec(spec.to_string()))?;
        effect
            .descriptor()
            .port_by_name(port_name)
            .ok_or_else(|| HostError::MalformedWireSpec(spec.to_string()))?;
        Ok((effect, port_name))
    }

    /// Allocates a chain-internal buffer wiring `source` (an
    /// `"effect.port"` audio output) to every target in `destinations`
    /// (audio inputs), and connects every involved port to that same
    /// buffer.
    pub fn add_wire(&mut self, source: &str, destinations: &[String]) -> Result<(), HostError> {
        let (source_effect_name, source_port_name) = parse_target(source)?;
        self.resolve(source)?;
        let mut resolved_destinations = Vec::with_capacity(destinations.len());
        for dest in destinations {
            let (dest_effect, dest_port) = self.resolve(dest)?;
            resolved_destinations.push((dest_effect.name().to_string(), dest_port.to_string()));
        }

        let buffer = vec![0.0f32; self.max_frames].into_boxed_slice();
        let source_effect = self.get_effect(source_effect_name)?;
        source_effect.connect(source_port_name, buffer.as_ptr() as *mut f32)?;
        for (dest_name, dest_port) in &resolved_destinations {
            self.get_effect(dest_name)?
                .connect(dest_port, buffer.as_ptr() as *mut f32)?;
        }

        self.wires.push(Wire {
            source_effect: source_effect_name.to_string(),
            source_port: source_port_name.to_string(),
            destinations: resolved_destinations,
            buffer,
        });
        Ok(())
    }

    /// Records a route between one effect's audio port and a named
    /// external port. The actual buffer binding happens once per cycle in
    /// `run`, since the audio server supplies a fresh buffer every cycle.
    pub fn add_route(&mut self, effect_port_spec: &str, external_port: &str) -> Result<(), HostError> {
        let (effect_name, port_name) = self.resolve(effect_port_spec).map(|(e, p)| {
            (e.name().to_string(), p.to_string())
        })?;
        let scratch = vec![0.0f32; self.max_frames].into_boxed_slice();
        self.get_effect(&effect_name)?
            .connect(&port_name, scratch.as_ptr() as *mut f32)?;
        self.routes.push(Route {
            effect_name,
            port_name,
            external_port: external_port.to_string(),
        });
        self.route_scratch.push(scratch);
        Ok(())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Activates every owned effect. One-way: subsequent calls are a no-op.
    pub fn activate(&mut self) -> Result<(), HostError> {
        if self.activated {
            return Ok(());
        }
        for effect in self.effects.values() {
            effect.activate()?;
        }
        self.activated = true;
        Ok(())
    }

    /// Realtime: binds each route's effect port to the external buffer the
    /// audio server supplied for this cycle, runs every effect in
    /// insertion order, then unbinds the routes again (the server does not
    /// guarantee a port's buffer pointer is stable across cycles).
    pub fn run<F>(&self, nframes: u64, mut external_buffer: F)
    where
        F: FnMut(&str) -> *mut f32,
    {
        for route in &self.routes {
            if let Ok(effect) = self.get_effect(&route.effect_name) {
                let _ = effect.connect(&route.port_name, external_buffer(&route.external_port));
            }
        }
        for effect in self.effects.values() {
            effect.run(nframes);
        }
        for (route, scratch) in self.routes.iter().zip(self.route_scratch.iter()) {
            if let Ok(effect) = self.get_effect(&route.effect_name) {
                let _ = effect.connect(&route.port_name, scratch.as_ptr() as *mut f32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::abi::RawDefaultHint;
    use crate::plugin::registry::mock::{MockDescriptorBuilder, MockSource};
    use std::path::Path;

    fn registry_with_identity_and_amp() -> &'static PluginRegistry {
        let identity = MockDescriptorBuilder::new("Identity", 1)
            .audio_input("Input")
            .audio_output("Output")
            .build();
        let amp = MockDescriptorBuilder::new("Amp", 2)
            .audio_input("Input")
            .audio_output("Output")
            .control_input("Gain", 0.0, 2.0, RawDefaultHint::Middle)
            .build();
        let mut registry = PluginRegistry::with_source(Box::new(MockSource {
            descriptors: vec![identity, amp],
        }));
        registry.load(Path::new("mock.so")).unwrap();
        Box::leak(Box::new(registry))
    }

    #[test]
    fn duplicate_effect_name_rejected() {
        let registry = registry_with_identity_and_amp();
        let mut chain = Chain::new("c1", 64);
        chain.add_effect("e1", "Identity", registry, 48_000).unwrap();
        assert!(matches!(
            chain.add_effect("e1", "Identity", registry, 48_000),
            Err(HostError::DuplicateEffect(_))
        ));
    }

    #[test]
    fn wire_connects_source_and_destination_to_same_buffer() {
        let registry = registry_with_identity_and_amp();
        let mut chain = Chain::new("c1", 64);
        chain.add_effect("e1", "Identity", registry, 48_000).unwrap();
        chain.add_effect("e2", "Identity", registry, 48_000).unwrap();
        chain
            .add_wire("e1.Output", &["e2.Input".to_string()])
            .unwrap();
        assert_eq!(chain.wires.len(), 1);
    }

    #[test]
    fn malformed_wire_spec_without_dot_is_rejected() {
        let registry = registry_with_identity_and_amp();
        let mut chain = Chain::new("c1", 64);
        chain.add_effect("e1", "Identity", registry, 48_000).unwrap();
        assert!(matches!(
            chain.add_wire("e1Output", &[]),
            Err(HostError::MalformedWireSpec(_))
        ));
    }

    #[test]
    fn unknown_effect_in_wire_target_is_rejected() {
        let registry = registry_with_identity_and_amp();
        let mut chain = Chain::new("c1", 64);
        chain.add_effect("e1", "Identity", registry, 48_000).unwrap();
        assert!(matches!(
            chain.add_wire("e1.Output", &["missing.Input".to_string()]),
            Err(HostError::MalformedWireSpec(_))
        ));
    }

    #[test]
    fn fan_out_destinations_share_identical_buffer_pointer() {
        let registry = registry_with_identity_and_amp();
        let mut chain = Chain::new("c1", 64);
        chain.add_effect("src", "Identity", registry, 48_000).unwrap();
        chain.add_effect("d1", "Identity", registry, 48_000).unwrap();
        chain.add_effect("d2", "Identity", registry, 48_000).unwrap();
        chain
            .add_wire("src.Output", &["d1.Input".to_string(), "d2.Input".to_string()])
            .unwrap();
        let wire = &chain.wires[0];
        assert_eq!(wire.destinations.len(), 2);
    }

    #[test]
    fn run_zero_frames_is_a_no_op() {
        let registry = registry_with_identity_and_amp();
        let mut chain = Chain::new("c1", 64);
        chain.add_effect("e1", "Identity", registry, 48_000).unwrap();
        let mut input = [0.0f32; 64];
        let mut output = [0.0f32; 64];
        chain.add_route("e1.Input", "ext_in").unwrap();
        chain.add_route("e1.Output", "ext_out").unwrap();
        chain.activate().unwrap();
        chain.run(0, |name| {
            if name == "ext_in" {
                input.as_mut_ptr()
            } else {
                output.as_mut_ptr()
            }
        });
    }
}
