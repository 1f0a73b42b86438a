//! Top-level orchestrator: owns the plugin registry, the chains, and the
//! audio-server client; implements the startup sequence and the runtime
//! callback handlers dispatched by the audio server.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use log::{info, warn};

use crate::audio_server::{ActiveAudioServerClient, AudioServerClient, AudioServerHandlers};
use crate::chain::Chain;
use crate::config::Config;
use crate::error::HostError;
use crate::event::{Event, EventBus};
use crate::plugin::PluginRegistry;

/// Leaks `registry` to a process-lifetime shared reference. Plugin
/// libraries are never unloaded, so this matches the data model: the
/// registry genuinely does outlive every chain built from it.
fn leak_registry(registry: PluginRegistry) -> &'static PluginRegistry {
    Box::leak(Box::new(registry))
}

/// Owns every chain and the auto-connect table; dispatches the audio
/// server's callbacks once activated. Construction (`build`) and
/// activation (`start`) are each one-shot.
pub struct Processor {
    chains: IndexMap<String, Chain>,
    auto_connect: HashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl Processor {
    /// Performs steps 1-4 of the startup sequence: opens the audio client,
    /// records the auto-connect table, loads every declared plugin
    /// library, and builds every declared chain (including its external
    /// input/output ports).
    pub fn build(
        config: &Config,
        event_bus: Arc<EventBus>,
    ) -> Result<(Processor, AudioServerClient), HostError> {
        let mut audio_client = AudioServerClient::open("effectd")?;

        let mut auto_connect: HashMap<String, Vec<String>> = HashMap::new();
        for (source, destination) in &config.routes {
            auto_connect
                .entry(source.clone())
                .or_default()
                .push(destination.clone());
        }

        let mut registry = PluginRegistry::new();
        for path in &config.plugins {
            registry.load(Path::new(path))?;
        }
        let registry = leak_registry(registry);

        let sample_rate = audio_client.sample_rate() as u64;
        let max_frames = audio_client.max_buffer_size();

        let mut chains = IndexMap::new();
        for chain_config in &config.chains {
            if chains.contains_key(&chain_config.name) {
                return Err(HostError::DuplicateChain(chain_config.name.clone()));
            }
            let mut chain = Chain::new(&chain_config.name, max_frames);

            for effect in &chain_config.effects {
                chain.add_effect(&effect.name, &effect.plugin_type, registry, sample_rate)?;
                for (control_name, value) in &effect.controls {
                    chain.get_effect(&effect.name)?.set_control(control_name, *value)?;
                }
            }
            for effect in &chain_config.effects {
                for (source_port, destinations) in &effect.wires {
                    let source = format!("{}.{}", effect.name, source_port);
                    chain.add_wire(&source, destinations)?;
                }
            }

            for (n, input_name) in chain_config.inputs.iter().enumerate() {
                let external = format!("{}_in_{}", chain_config.name, n + 1);
                audio_client.add_input(&external)?;
                chain.add_route(input_name, &external)?;
            }
            for (n, output_name) in chain_config.outputs.iter().enumerate() {
                let external = format!("{}_out_{}", chain_config.name, n + 1);
                audio_client.add_output(&external)?;
                chain.add_route(output_name, &external)?;
            }

            chains.insert(chain_config.name.clone(), chain);
        }

        Ok((
            Processor {
                chains,
                auto_connect,
                event_bus,
            },
            audio_client,
        ))
    }

    /// Performs steps 5-8: activates every chain, activates the audio
    /// client, runs auto-connect, and emits `AudioStarted`.
    pub fn start(
        mut self,
        audio_client: AudioServerClient,
    ) -> Result<(Arc<Processor>, ActiveAudioServerClient), HostError> {
        let lock = audio_client.lock();
        {
            let _guard = lock.acquire();
            self.activate_chains()?;
        }
        let auto_connect = self.auto_connect.clone();
        let processor = Arc::new(self);

        let active = audio_client.activate(Arc::clone(&processor) as Arc<dyn AudioServerHandlers>)?;

        run_auto_connect(&active, &auto_connect);

        processor.event_bus.send(Event::AudioStarted);
        info!("processor started");
        Ok((processor, active))
    }

    /// Re-runs auto-connect against the server's current port list. Called
    /// by the supervisor after an `AudioClientChange` event.
    pub fn reconnect(&self, active: &ActiveAudioServerClient) {
        run_auto_connect(active, &self.auto_connect);
    }

    /// Activates every chain, failing on the first error. Called with the
    /// client lock held, so a partially-activated processor is never
    /// visible to the realtime path.
    fn activate_chains(&mut self) -> Result<(), HostError> {
        for chain in self.chains.values_mut() {
            chain.activate().map_err(|e| {
                warn!("chain {:?} failed to activate: {}", chain.name(), e);
                e
            })?;
        }
        Ok(())
    }
}

fn run_auto_connect(active: &ActiveAudioServerClient, auto_connect: &HashMap<String, Vec<String>>) {
    let known = active.known_port_names();
    for source in &known {
        if let Some(destinations) = auto_connect.get(source) {
            for destination in destinations {
                if let Err(e) = active.connect_port(source, destination) {
                    warn!("auto-connect {} -> {} failed: {}", source, destination, e);
                }
            }
        }
    }
}

impl AudioServerHandlers for Processor {
    fn on_process(&self, nframes: u32, port_buffer: &mut dyn FnMut(&str) -> *mut f32) {
        for chain in self.chains.values() {
            chain.run(nframes as u64, |name| port_buffer(name));
        }
        self.event_bus.send(Event::AudioProcessed);
    }

    fn on_shutdown(&self) {
        self.event_bus.send(Event::AudioStopped);
    }

    fn on_client_register(&self, client_name: &str, registered: bool) {
        info!("client {} {}", client_name, if registered { "registered" } else { "unregistered" });
        self.event_bus.send(Event::AudioClientChange);
    }

    fn on_port_register(&self, _registered: bool) {
        self.event_bus.send(Event::AudioClientChange);
    }

    fn on_sample_rate_change(&self, new_rate: u32) {
        self.event_bus
            .send(Event::Fatal(format!("sample rate changed to {}", new_rate)));
    }

    fn on_buffer_size_change(&self, new_size: u32) {
        self.event_bus
            .send(Event::Fatal(format!("buffer size changed to {}", new_size)));
    }
}
