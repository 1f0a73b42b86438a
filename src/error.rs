//! Unified error taxonomy for the host.

use thiserror::Error;

/// Every failure mode the host can surface, from configuration parsing
/// through plugin loading, chain construction, and runtime operation.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("failed to parse configuration document: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to load plugin library {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    #[error(transparent)]
    Dlopen(#[from] libloading::Error),

    #[error("plugin {kind} {name:?} already registered")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("effect {0:?} already exists in this chain")]
    DuplicateEffect(String),

    #[error("chain {0:?} already exists in this processor")]
    DuplicateChain(String),

    #[error("no plugin named {0:?} is registered")]
    UnknownPlugin(String),

    #[error("no effect named {0:?} in this chain")]
    UnknownEffect(String),

    #[error("port {0:?} is not declared on this plugin")]
    UnknownPort(String),

    #[error("no chain named {0:?} in this processor")]
    UnknownChain(String),

    #[error("malformed wire target {0:?}, expected \"effect.port\"")]
    MalformedWireSpec(String),

    #[error("cannot activate effect {0:?}: not every audio port has a bound buffer")]
    NotFullyConnected(String),

    #[error("failed to allocate a sample buffer: {0}")]
    AllocationFailure(String),

    #[error("unrecoverable condition reported by the audio server: {0}")]
    Unrecoverable(String),

    #[error(transparent)]
    Audio(#[from] jack::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
