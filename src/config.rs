//! Declarative configuration document: plugin libraries, chains, and
//! external-port auto-connect routes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::HostError;

/// One effect's declaration within a chain.
#[derive(Debug, Deserialize)]
pub struct EffectDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub controls: HashMap<String, f32>,
    #[serde(default)]
    pub wires: HashMap<String, Vec<String>>,
}

/// One chain's declaration.
#[derive(Debug, Deserialize)]
pub struct ChainDecl {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub effects: Vec<EffectDecl>,
}

/// Raw document shape, deserialized directly from YAML.
#[derive(Debug, Deserialize)]
pub struct ConfigDocument {
    pub plugins: Vec<String>,
    #[serde(default)]
    pub chains: IndexMap<String, ChainDecl>,
    #[serde(default)]
    pub routes: Vec<[String; 2]>,
}

/// One chain, flattened with its name for easy iteration in declaration
/// order (an `IndexMap` preserves the order keys first appeared in the raw
/// mapping, so chains run, and dispatch, in the order they were written).
pub struct ChainConfig {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub effects: Vec<EffectDecl>,
}

/// The validated, internal configuration consumed by `Processor::build`.
pub struct Config {
    pub plugins: Vec<String>,
    pub chains: Vec<ChainConfig>,
    pub routes: Vec<(String, String)>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, HostError> {
        let text = fs::read_to_string(path)?;
        let document: ConfigDocument = serde_yaml::from_str(&text)?;
        Config::validate(document)
    }

    fn validate(document: ConfigDocument) -> Result<Config, HostError> {
        if document.plugins.is_empty() {
            return Err(HostError::ConfigInvalid(
                "`plugins` section is missing or empty".to_string(),
            ));
        }

        let mut chains = Vec::with_capacity(document.chains.len());
        for (name, decl) in document.chains {
            for effect in &decl.effects {
                if effect.name.is_empty() {
                    return Err(HostError::ConfigInvalid(format!(
                        "chain {:?} has an effect with an empty name",
                        name
                    )));
                }
                for target in effect.wires.values().flatten() {
                    if !target.contains('.') {
                        return Err(HostError::MalformedWireSpec(target.clone()));
                    }
                }
            }
            chains.push(ChainConfig {
                name,
                inputs: decl.inputs,
                outputs: decl.outputs,
                effects: decl.effects,
            });
        }

        let routes = document
            .routes
            .into_iter()
            .map(|[source, destination]| (source, destination))
            .collect();

        Ok(Config {
            plugins: document.plugins,
            chains,
            routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_plugins_section_is_invalid() {
        let document = ConfigDocument {
            plugins: vec![],
            chains: IndexMap::new(),
            routes: vec![],
        };
        assert!(matches!(
            Config::validate(document),
            Err(HostError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn parses_minimal_document() {
        let yaml = r#"
plugins:
  - /usr/lib/ladspa/identity.so
chains:
  c1:
    inputs: ["src:out"]
    outputs: ["dst:in"]
    effects:
      - name: e
        type: Identity
        controls: {}
        wires:
          Output: ["e.Input"]
routes:
  - ["src:out", "c1_in_1"]
"#;
        let document: ConfigDocument = serde_yaml::from_str(yaml).unwrap();
        let config = Config::validate(document).unwrap();
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.routes, vec![("src:out".to_string(), "c1_in_1".to_string())]);
    }

    #[test]
    fn load_reads_and_validates_a_file_on_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
plugins:
  - /usr/lib/ladspa/identity.so
chains:
  c1:
    inputs: ["src:out"]
    outputs: ["dst:in"]
    effects:
      - name: e
        type: Identity
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.plugins, vec!["/usr/lib/ladspa/identity.so".to_string()]);
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].name, "c1");
    }

    #[test]
    fn load_of_missing_file_is_an_io_error() {
        let missing = Path::new("/nonexistent/effectd-config-does-not-exist.yaml");
        assert!(matches!(Config::load(missing), Err(HostError::Io(_))));
    }

    #[test]
    fn wire_target_without_dot_is_rejected() {
        let yaml = r#"
plugins: ["/dev/null"]
chains:
  c1:
    effects:
      - name: e
        type: Identity
        wires:
          Output: ["bad-target"]
"#;
        let document: ConfigDocument = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            Config::validate(document),
            Err(HostError::MalformedWireSpec(_))
        ));
    }
}
