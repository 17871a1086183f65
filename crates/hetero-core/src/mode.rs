//! Mode descriptors: which backend a device should bind, and where

use crate::error::{Error, Result};
use crate::properties::Properties;
use hetero_backends::{BackendKind, DeviceSelector};
use std::fmt;
use std::str::FromStr;

/// A parsed `{mode: ..., platform_id: ..., device_id: ...}` descriptor
///
/// The backend name is kept as written. Names that match no
/// [`BackendKind`] are valid descriptors; binding them falls back.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeDescriptor {
    mode: String,
    kind: Option<BackendKind>,
    platform_id: Option<u32>,
    device_id: Option<u32>,
    properties: Properties,
}

impl ModeDescriptor {
    /// Parse descriptor text: a relaxed JSON object or a bare backend name.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Configuration("empty mode descriptor".to_string()));
        }
        if trimmed.starts_with('{') {
            let properties = Properties::parse(trimmed).map_err(|e| Error::Configuration(e.to_string()))?;
            Self::from_properties(properties)
        } else {
            Self::from_properties(Properties::new().with("mode", trimmed))
        }
    }

    pub fn from_properties(properties: Properties) -> Result<Self> {
        let mode = match properties.get("mode") {
            Some(serde_json::Value::String(mode)) if !mode.trim().is_empty() => mode.trim().to_string(),
            Some(other) => {
                return Err(Error::Configuration(format!("mode must be a backend name, found `{other}`")));
            }
            None => {
                return Err(Error::Configuration(format!(
                    "mode descriptor `{properties}` has no `mode` key"
                )));
            }
        };
        let platform_id = index(&properties, "platform_id")?;
        let device_id = index(&properties, "device_id")?;

        Ok(Self {
            kind: BackendKind::from_name(&mode),
            mode,
            platform_id,
            device_id,
            properties,
        })
    }

    /// Descriptor for `kind` with no placement parameters.
    pub fn for_kind(kind: BackendKind) -> Self {
        Self {
            mode: kind.name().to_string(),
            kind: Some(kind),
            platform_id: None,
            device_id: None,
            properties: Properties::new().with("mode", kind.name()),
        }
    }

    /// The backend name as written.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// The recognized backend kind, `None` for unknown names.
    pub fn kind(&self) -> Option<BackendKind> {
        self.kind
    }

    pub fn platform_id(&self) -> Option<u32> {
        self.platform_id
    }

    pub fn device_id(&self) -> Option<u32> {
        self.device_id
    }

    pub fn selector(&self) -> DeviceSelector {
        DeviceSelector {
            platform_id: self.platform_id,
            device_id: self.device_id,
        }
    }

    /// Every key of the descriptor, including backend-specific extras.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl Default for ModeDescriptor {
    fn default() -> Self {
        Self::for_kind(BackendKind::FALLBACK)
    }
}

impl FromStr for ModeDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<BackendKind> for ModeDescriptor {
    fn from(kind: BackendKind) -> Self {
        Self::for_kind(kind)
    }
}

impl fmt::Display for ModeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.properties)
    }
}

fn index(properties: &Properties, key: &str) -> Result<Option<u32>> {
    match properties.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| Error::Configuration(format!("{key} must be a non-negative integer, found `{value}`"))),
    }
}
