//! Topology cache
//!
//! Persists the discovered part of the registry and rebuilds it later as
//! cached devices. Two on-disk formats are supported: a JSON array of device
//! records and the framed binary snapshot from the `record` crate.

use crate::manager::HostManager;
use crate::model::Device;
use common::Result;
use record::DeviceRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    #[default]
    Json,
    Snapshot,
}

#[derive(Debug, Clone)]
pub struct TopologyCache {
    path: PathBuf,
    format: CacheFormat,
}

impl TopologyCache {
    pub fn new(path: impl Into<PathBuf>, format: CacheFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> CacheFormat {
        self.format
    }

    /// Write every discovered device of `manager` to the cache file
    ///
    /// Returns the number of devices written. Nothing is written when the
    /// registry holds no discovered device.
    pub fn export(&self, manager: &HostManager) -> Result<usize> {
        let records = manager.export_records();
        if records.is_empty() {
            debug!("No discovered devices, cache not written");
            return Ok(0);
        }
        self.write_records(&records)?;
        Ok(records.len())
    }

    pub fn write_records(&self, records: &[DeviceRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        match self.format {
            CacheFormat::Json => fs::write(&self.path, record::encode_json(records)?)?,
            CacheFormat::Snapshot => {
                let mut writer = BufWriter::new(fs::File::create(&self.path)?);
                record::write_snapshot(&mut writer, records)?;
                writer.flush()?;
            }
        }

        info!(
            "Wrote {} device record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read the cached device records
    pub fn import(&self) -> Result<Vec<DeviceRecord>> {
        let records = match self.format {
            CacheFormat::Json => record::decode_json(&fs::read_to_string(&self.path)?)?,
            CacheFormat::Snapshot => {
                let mut reader = BufReader::new(fs::File::open(&self.path)?);
                record::read_snapshot(&mut reader)?
            }
        };
        debug!(
            "Read {} device record(s) from {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }

    /// Rebuild the cached devices and register them with `manager`
    ///
    /// All records are converted before any is registered. Returns the native
    /// ids of the registered devices.
    pub fn import_into(&self, manager: &HostManager) -> Result<Vec<u64>> {
        let devices = self
            .import()?
            .iter()
            .map(Device::from_record)
            .collect::<Result<Vec<_>>>()?;

        let ids = devices
            .into_iter()
            .map(|device| {
                let id = device.device_id();
                manager.add_device(id, device);
                id
            })
            .collect::<Vec<_>>();

        info!("Imported {} cached device(s)", ids.len());
        Ok(ids)
    }
}
