use crate::data_structures::{GeoPoint, SignalId, SignalSite};
use crate::error::{EngineError, EngineResult};
use crate::global_variables::ENV_SIGNALS_PATH;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Static catalogue of signals. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct SignalRegistry {
    sites: Vec<SignalSite>,
    index: HashMap<SignalId, usize>,
}

/// Layout of one entry in `signals.json`.
#[derive(Debug, Deserialize)]
struct SignalRecordJson {
    signal_id: String,
    #[serde(default)]
    name: Option<String>,
    location: [f64; 2],
}

impl SignalRegistry {
    pub fn new(sites: Vec<SignalSite>) -> EngineResult<Self> {
        let mut index = HashMap::with_capacity(sites.len());
        for (i, site) in sites.iter().enumerate() {
            if site.id.as_str().trim().is_empty() {
                return Err(EngineError::Config("signal id must not be empty".to_string()));
            }
            site.position
                .validate()
                .map_err(|e| EngineError::Config(format!("signal {}: {}", site.id, e)))?;
            if index.insert(site.id.clone(), i).is_some() {
                return Err(EngineError::Config(format!("duplicate signal id {}", site.id)));
            }
        }
        Ok(Self { sites, index })
    }

    /// Loads `[{"signal_id": "...", "name": "...", "location": [lat, lng]}, ...]`.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let file = File::open(path.as_ref())?;
        let raw: Vec<SignalRecordJson> = serde_json::from_reader(BufReader::new(file))?;
        let sites = raw
            .into_iter()
            .map(|r| SignalSite {
                name: r.name.unwrap_or_else(|| r.signal_id.clone()),
                id: SignalId(r.signal_id),
                position: GeoPoint::new(r.location[0], r.location[1]),
            })
            .collect();
        Self::new(sites)
    }

    /// Reads the file named by `GREEN_CORRIDOR_SIGNALS`, or the built-in catalogue.
    pub fn from_env() -> EngineResult<Self> {
        match std::env::var(ENV_SIGNALS_PATH) {
            Ok(path) => Self::from_json_file(path),
            Err(_) => Self::new(create_signals()),
        }
    }

    pub fn get(&self, id: &SignalId) -> Option<&SignalSite> {
        self.index.get(id).map(|&i| &self.sites[i])
    }

    /// Arena slot of a signal; stable for the registry's lifetime.
    pub fn position(&self, id: &SignalId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &SignalId) -> bool {
        self.index.contains_key(id)
    }

    /// Sites in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = &SignalSite> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Demo catalogue: junctions along two arterial roads in Chennai.
pub fn create_signals() -> Vec<SignalSite> {
    vec![
        SignalSite::new("SIG-001", "Anna Salai / Mount Road", 13.0600, 80.2500),
        SignalSite::new("SIG-002", "Gemini Flyover", 13.0650, 80.2550),
        SignalSite::new("SIG-003", "Teynampet", 13.0700, 80.2600),
        SignalSite::new("SIG-004", "Thousand Lights", 13.0750, 80.2650),
        SignalSite::new("SIG-005", "Spencer Junction", 13.0800, 80.2700),
        SignalSite::new("SIG-006", "Central Station", 13.0827, 80.2707),
        SignalSite::new("SIG-007", "Park Town", 13.0842, 80.2735),
        SignalSite::new("SIG-008", "Egmore", 13.0860, 80.2765),
        SignalSite::new("SIG-009", "Vepery", 13.0880, 80.2795),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn demo_catalogue_is_valid() {
        let registry = SignalRegistry::new(create_signals()).unwrap();
        assert_eq!(registry.len(), 9);
        assert!(registry.contains(&SignalId::new("SIG-006")));
        assert_eq!(
            registry.get(&SignalId::new("SIG-003")).map(|s| s.name.as_str()),
            Some("Teynampet")
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let sites = vec![
            SignalSite::new("SIG-1", "a", 13.0, 80.0),
            SignalSite::new("SIG-1", "b", 13.1, 80.1),
        ];
        assert!(matches!(SignalRegistry::new(sites), Err(EngineError::Config(_))));
    }

    #[test]
    fn loads_signals_json_layout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"signal_id": "S1", "name": "Harbour", "location": [13.06, 80.25]}},
                {{"signal_id": "S2", "location": [13.07, 80.26]}}]"#
        )
        .unwrap();

        let registry = SignalRegistry::from_json_file(file.path()).unwrap();
        let ids: Vec<&str> = registry.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert_eq!(registry.get(&SignalId::new("S2")).unwrap().name, "S2");
        assert_eq!(
            registry.get(&SignalId::new("S1")).unwrap().position,
            GeoPoint::new(13.06, 80.25)
        );
    }
}
