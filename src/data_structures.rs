use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Stable identifier of a traffic signal (e.g. "SIG-001").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub String);

impl SignalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an ambulance as issued by the dispatch service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmbulanceId(pub String);

impl AmbulanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.0.trim().is_empty() {
            return Err(EngineError::invalid("ambulance id must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for AmbulanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(EngineError::invalid(format!("latitude {} out of range", self.lat)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(EngineError::invalid(format!("longitude {} out of range", self.lng)));
        }
        Ok(())
    }
}

/// Patient severity reported by dispatch. Declaration order is priority order,
/// so the derived `Ord` gives `Low < Moderate < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Moderate => "MODERATE",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MODERATE" => Ok(Severity::Moderate),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(EngineError::invalid(format!(
                "invalid severity '{}'; expected LOW, MODERATE, HIGH or CRITICAL",
                s
            ))),
        }
    }
}

/// Trip lifecycle as reported by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripState {
    EnRoute,
    Delivered,
    Cancelled,
}

impl TripState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripState::Delivered | TripState::Cancelled)
    }
}

/// A physical signal as catalogued at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSite {
    /// Stable identity used as the lock resource key.
    pub id: SignalId,
    /// Display name shown on dashboards.
    pub name: String,
    /// Junction position.
    pub position: GeoPoint,
}

impl SignalSite {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            id: SignalId::new(id),
            name: name.into(),
            position: GeoPoint::new(lat, lng),
        }
    }
}
