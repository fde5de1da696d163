//! Per-device calibration records and their storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use lightctl_traits::PortInfo;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::calibration::{LinearFit, Method};
use crate::error::{LightError, Result};

/// Port descriptor saved alongside a record, for humans reading the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub port: String,
    pub description: String,
    pub manufacturer: String,
    pub serial_number: Option<String>,
}

/// Stable identity of a controller board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// 16 hex characters.
    pub id: String,
    /// The string the id was derived from.
    pub key: String,
    pub board: BoardInfo,
}

// FNV-1a, 64 bit.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

// Windows port names are case-insensitive.
fn normalize_port(port: &str) -> String {
    if port.len() > 3 && port.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("com")) {
        port.to_ascii_uppercase()
    } else {
        port.to_string()
    }
}

impl DeviceIdentity {
    /// Derive an identity from the richest descriptor available:
    /// serial number, then `VID:PID:location`, then `VID:PID:port`, then
    /// `port:description`.
    pub fn from_port(info: &PortInfo) -> Self {
        let port = normalize_port(&info.port);
        let description = info.description.clone().unwrap_or_else(|| "Unknown".to_string());
        let key = match (&info.serial_number, info.vid, info.pid, &info.location) {
            (Some(sn), ..) if !sn.is_empty() => sn.clone(),
            (_, Some(vid), Some(pid), Some(loc)) => format!("{vid}:{pid}:{loc}"),
            (_, Some(vid), Some(pid), None) => format!("{vid}:{pid}:{port}"),
            _ => format!("{port}:{description}"),
        };
        let id = format!("{:016x}", fnv1a64(key.as_bytes()));
        Self {
            id,
            key,
            board: BoardInfo {
                port: info.port.clone(),
                description,
                manufacturer: info
                    .manufacturer
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
                serial_number: info.serial_number.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub device_id: String,
    /// Host time over device time; device-bound durations are divided by it.
    pub calib_factor: f64,
    pub offset: f64,
    pub r_squared: f64,
    #[serde(default)]
    pub rmse: f64,
    #[serde(default)]
    pub max_residual: f64,
    pub method: Method,
    pub timestamp: DateTime<Utc>,
    pub board_info: BoardInfo,
}

impl CalibrationRecord {
    pub fn from_fit(identity: &DeviceIdentity, fit: &LinearFit, method: Method, at: DateTime<Utc>) -> Self {
        Self {
            device_id: identity.id.clone(),
            calib_factor: fit.factor,
            offset: fit.offset,
            r_squared: fit.r_squared,
            rmse: fit.rmse,
            max_residual: fit.max_residual,
            method,
            timestamp: at,
            board_info: identity.board.clone(),
        }
    }

    /// Whole days since the record was taken.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_days()
    }

    /// A record older than `validity_days` whole days is expired.
    pub fn is_valid(&self, now: DateTime<Utc>, validity_days: u32) -> bool {
        self.age_days(now) <= i64::from(validity_days)
    }
}

/// Calibration persistence, keyed by device id.
pub trait CalibrationStore {
    fn load(&self, device_id: &str) -> Result<Option<CalibrationRecord>>;
    fn save(&self, record: &CalibrationRecord) -> Result<()>;
    /// Returns whether a record was removed.
    fn delete(&self, device_id: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<CalibrationRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, CalibrationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationStore for MemoryStore {
    fn load(&self, device_id: &str) -> Result<Option<CalibrationRecord>> {
        let map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(device_id).cloned())
    }

    fn save(&self, record: &CalibrationRecord) -> Result<()> {
        let mut map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(record.device_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, device_id: &str) -> Result<bool> {
        let mut map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(device_id).is_some())
    }

    fn list(&self) -> Result<Vec<CalibrationRecord>> {
        let map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.values().cloned().collect())
    }
}

/// JSON object keyed by device id, rewritten atomically on every change.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, CalibrationRecord>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(LightError::Store(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            LightError::Store(format!(
                "calibration database {} is corrupt: {e}",
                self.path.display()
            ))
        })
    }

    fn write_all(&self, map: &BTreeMap<String, CalibrationRecord>) -> Result<()> {
        let json = serde_json::to_vec_pretty(map)
            .map_err(|e| LightError::Store(format!("cannot encode calibration database: {e}")))?;
        write_atomic(&self.path, &json).map_err(|e| {
            LightError::Store(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

impl CalibrationStore for JsonFileStore {
    fn load(&self, device_id: &str) -> Result<Option<CalibrationRecord>> {
        Ok(self.read_all()?.remove(device_id))
    }

    fn save(&self, record: &CalibrationRecord) -> Result<()> {
        let mut map = self.read_all()?;
        map.insert(record.device_id.clone(), record.clone());
        self.write_all(&map)?;
        tracing::info!(device_id = %record.device_id, path = %self.path.display(), "calibration saved");
        Ok(())
    }

    fn delete(&self, device_id: &str) -> Result<bool> {
        let mut map = self.read_all()?;
        let removed = map.remove(device_id).is_some();
        if removed {
            self.write_all(&map)?;
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<CalibrationRecord>> {
        Ok(self.read_all()?.into_values().collect())
    }
}
