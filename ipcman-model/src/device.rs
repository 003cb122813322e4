use std::fmt;

use bitflags::bitflags;
use chrono_tz::Tz;
use url::Url;

use crate::error::{ModelError, Result};
use crate::ids::DeviceId;

bitflags! {
    /// Optional behaviours enabled per device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[cfg_attr(feature = "serde", serde(transparent))]
    pub struct DeviceFeature: u32 {
        /// Device is a camera (has coaxial IO, streams, snapshots).
        const CAMERA = 1;
    }
}

impl DeviceFeature {
    /// Parses feature names as stored by the catalog, ignoring unknown ones.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .fold(DeviceFeature::empty(), |acc, name| match name {
                "camera" => acc | DeviceFeature::CAMERA,
                _ => acc,
            })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Read-only snapshot of everything needed to talk to one device.
///
/// The catalog owns the device row; workers only ever see this snapshot and
/// compare snapshots to decide whether a worker group must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionDescriptor {
    pub id: DeviceId,
    pub address: Url,
    pub credentials: Credentials,
    pub time_zone: Tz,
    /// Small integer used to decorrelate file timestamps across devices.
    pub seed: i64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub features: DeviceFeature,
}

impl ConnectionDescriptor {
    pub fn new(
        id: DeviceId,
        address: &str,
        credentials: Credentials,
        time_zone: &str,
        seed: i64,
    ) -> Result<Self> {
        let address = Url::parse(address)
            .map_err(|err| ModelError::InvalidAddress(format!("{address}: {err}")))?;
        if address.host_str().is_none() {
            return Err(ModelError::InvalidAddress(format!(
                "{address}: missing host"
            )));
        }
        let time_zone = time_zone
            .parse::<Tz>()
            .map_err(|_| ModelError::InvalidTimeZone(time_zone.to_string()))?;

        Ok(Self {
            id,
            address,
            credentials,
            time_zone,
            seed,
            features: DeviceFeature::empty(),
        })
    }

    pub fn with_features(mut self, features: DeviceFeature) -> Self {
        self.features = features;
        self
    }

    /// `scheme://host` of the device with any path, port-less host kept as is.
    pub fn origin(&self) -> String {
        let host = self.address.host_str().unwrap_or_default();
        match self.address.port() {
            Some(port) => format!("{}://{}:{}", self.address.scheme(), host, port),
            None => format!("{}://{}", self.address.scheme(), host),
        }
    }
}
