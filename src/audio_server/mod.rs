//! Integration with a realtime audio server (JACK): named port
//! registration, the client lock separating realtime from configuration
//! operations, and dispatch of server callbacks to the processor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use jack::{AsyncClient, AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, PortFlags};
use log::{error, info, warn};

use crate::error::HostError;

/// Callbacks the audio-server client dispatches into. Implemented by the
/// processor; every method here corresponds to one of the server's
/// notification or process callbacks.
pub trait AudioServerHandlers: Send + Sync {
    /// Realtime. `port_buffer(name)` yields the raw sample pointer for the
    /// named external port for this cycle, or null if unknown.
    fn on_process(&self, nframes: u32, port_buffer: &mut dyn FnMut(&str) -> *mut f32);
    fn on_shutdown(&self);
    fn on_client_register(&self, client_name: &str, registered: bool);
    fn on_port_register(&self, registered: bool);
    /// Fatal: the server changed sample rate after startup.
    fn on_sample_rate_change(&self, new_rate: u32);
    /// Fatal: the server changed buffer size after startup.
    fn on_buffer_size_change(&self, new_size: u32);
}

/// Separates the realtime audio thread from non-realtime configuration
/// mutation. Every server callback acquires this before calling into
/// `AudioServerHandlers`; configuration code acquires it to mutate
/// anything the realtime path reads.
#[derive(Clone)]
pub struct ClientLock(Arc<Mutex<()>>);

impl ClientLock {
    fn new() -> Self {
        ClientLock(Arc::new(Mutex::new(())))
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().expect("audio client lock poisoned")
    }
}

/// The client before activation: ports can still be registered.
pub struct AudioServerClient {
    client: Client,
    inputs: HashMap<String, jack::Port<AudioIn>>,
    outputs: HashMap<String, jack::Port<AudioOut>>,
    lock: ClientLock,
}

impl AudioServerClient {
    pub fn open(client_name: &str) -> Result<Self, HostError> {
        let (client, status) = Client::new(client_name, ClientOptions::NO_START_SERVER)?;
        info!("opened audio server client {:?} (status {:?})", client_name, status);
        Ok(AudioServerClient {
            client,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            lock: ClientLock::new(),
        })
    }

    pub fn add_input(&mut self, name: &str) -> Result<(), HostError> {
        let port = self.client.register_port(name, AudioIn::default())?;
        self.inputs.insert(name.to_string(), port);
        Ok(())
    }

    pub fn add_output(&mut self, name: &str) -> Result<(), HostError> {
        let port = self.client.register_port(name, AudioOut::default())?;
        self.outputs.insert(name.to_string(), port);
        Ok(())
    }

    pub fn sample_rate(&self) -> usize {
        self.client.sample_rate() as usize
    }

    pub fn max_buffer_size(&self) -> usize {
        self.client.buffer_size() as usize
    }

    pub fn lock(&self) -> ClientLock {
        self.lock.clone()
    }

    /// Every currently known port name on the server, for auto-connect
    /// matching.
    pub fn known_port_names(&self) -> Vec<String> {
        self.client.ports(None, None, PortFlags::empty())
    }

    pub fn connect_port(&self, source: &str, destination: &str) -> Result<(), HostError> {
        match self.client.connect_ports_by_name(source, destination) {
            Ok(()) => Ok(()),
            Err(jack::Error::PortAlreadyConnected(_, _)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Activates the client, handing ownership of the registered ports and
    /// the process/notification dispatch to the audio server. Consumes
    /// `self`; returns a handle for deactivation.
    pub fn activate(
        self,
        handlers: Arc<dyn AudioServerHandlers>,
    ) -> Result<ActiveAudioServerClient, HostError> {
        let process = ProcessBridge {
            inputs: self.inputs,
            outputs: self.outputs,
            handlers: Arc::clone(&handlers),
            lock: self.lock.clone(),
        };
        let notify = NotificationBridge {
            handlers,
            lock: self.lock.clone(),
        };
        let async_client = self.client.activate_async(notify, process)?;
        Ok(ActiveAudioServerClient {
            async_client: Some(async_client),
            lock: self.lock,
        })
    }
}

struct ProcessBridge {
    inputs: HashMap<String, jack::Port<AudioIn>>,
    outputs: HashMap<String, jack::Port<AudioOut>>,
    handlers: Arc<dyn AudioServerHandlers>,
    lock: ClientLock,
}

impl jack::ProcessHandler for ProcessBridge {
    fn process(&mut self, _client: &Client, ps: &jack::ProcessScope) -> Control {
        let _guard = self.lock.acquire();
        let inputs = &self.inputs;
        let outputs = &mut self.outputs;
        let nframes = ps.n_frames();
        let mut port_buffer = move |name: &str| -> *mut f32 {
            if let Some(port) = inputs.get(name) {
                return port.as_slice(ps).as_ptr() as *mut f32;
            }
            if let Some(port) = outputs.get_mut(name) {
                return port.as_mut_slice(ps).as_mut_ptr();
            }
            std::ptr::null_mut()
        };
        self.handlers.on_process(nframes, &mut port_buffer);
        Control::Continue
    }

    fn buffer_size(&mut self, _client: &Client, size: jack::Frames) -> Control {
        let _guard = self.lock.acquire();
        error!("audio server changed buffer size to {}", size);
        self.handlers.on_buffer_size_change(size);
        Control::Continue
    }
}

struct NotificationBridge {
    handlers: Arc<dyn AudioServerHandlers>,
    lock: ClientLock,
}

impl jack::NotificationHandler for NotificationBridge {
    unsafe fn shutdown(&mut self, _status: ClientStatus, reason: &str) {
        let _guard = self.lock.acquire();
        warn!("audio server shut down: {}", reason);
        self.handlers.on_shutdown();
    }

    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        let _guard = self.lock.acquire();
        error!("audio server changed sample rate to {}", srate);
        self.handlers.on_sample_rate_change(srate);
        Control::Continue
    }

    fn client_registration(&mut self, _client: &Client, name: &str, is_registered: bool) {
        let _guard = self.lock.acquire();
        self.handlers.on_client_register(name, is_registered);
    }

    fn port_registration(&mut self, _client: &Client, _port_id: jack::PortId, is_registered: bool) {
        let _guard = self.lock.acquire();
        self.handlers.on_port_register(is_registered);
    }
}

/// An activated client. Dropping this without calling `deactivate`
/// deactivates on drop via the underlying `AsyncClient`.
pub struct ActiveAudioServerClient {
    async_client: Option<AsyncClient<NotificationBridge, ProcessBridge>>,
    lock: ClientLock,
}

impl ActiveAudioServerClient {
    pub fn lock(&self) -> ClientLock {
        self.lock.clone()
    }

    pub fn connect_port(&self, source: &str, destination: &str) -> Result<(), HostError> {
        let client = self
            .async_client
            .as_ref()
            .expect("active client missing")
            .as_client();
        match client.connect_ports_by_name(source, destination) {
            Ok(()) => Ok(()),
            Err(jack::Error::PortAlreadyConnected(_, _)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn known_port_names(&self) -> Vec<String> {
        self.async_client
            .as_ref()
            .expect("active client missing")
            .as_client()
            .ports(None, None, PortFlags::empty())
    }

    pub fn deactivate(mut self) -> Result<(), HostError> {
        if let Some(async_client) = self.async_client.take() {
            async_client.deactivate()?;
        }
        Ok(())
    }
}
