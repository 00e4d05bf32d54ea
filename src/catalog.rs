use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::convert::ValueConverter;
use crate::registers::{EquipmentCategory, RegisterDefinition, SourceTier};
use crate::value_tables::{ValueTables, ValueTablesDocument};

pub const UNIVERSAL_FILE: &str = "universal_registers.json";
pub const VALUE_TABLES_FILE: &str = "value_tables.json";
pub const DEVICES_DIR: &str = "devices";
pub const EQUIPMENT_DIR: &str = "equipment";

/// Device types with a dedicated register file.
pub const DEVICE_FILES: &[(&str, &str)] = &[
    ("KWB Easyfire", "kwb_easyfire.json"),
    ("KWB Multifire", "kwb_multifire.json"),
    ("KWB Pelletfire+", "kwb_pelletfire_plus.json"),
    ("KWB Combifire", "kwb_combifire.json"),
    ("KWB CF 2", "kwb_cf2.json"),
    ("KWB CF 1", "kwb_cf1.json"),
    ("KWB CF 1.5", "kwb_cf1_5.json"),
];

pub fn device_file(device_type: &str) -> Option<&'static str> {
    DEVICE_FILES.iter().find(|(name, _)| *name == device_type).map(|(_, file)| *file)
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("required catalog file {1:?} does not exist")]
    ConfigNotFound(#[source] std::io::Error, PathBuf),
    #[error("could not parse catalog file {1:?}")]
    ConfigParse(#[source] serde_json::Error, PathBuf),
    #[error("could not read catalog file {1:?}")]
    ReadConfig(#[source] std::io::Error, PathBuf),
}

/// A register list document: `{"registers": [...]}`, or `{"universal_registers": [...]}`.
#[derive(Deserialize)]
struct RegisterList {
    #[serde(default, alias = "universal_registers")]
    registers: Vec<serde_json::Value>,
}

/// Parse a register list, dropping entries that do not describe a usable register.
fn parse_registers(
    content: &[u8],
    tier: SourceTier,
    path: &Path,
) -> Result<Vec<RegisterDefinition>, serde_json::Error> {
    let list: RegisterList = serde_json::from_slice(content)?;
    let mut registers = Vec::with_capacity(list.registers.len());
    for entry in list.registers {
        match RegisterDefinition::deserialize(entry) {
            Ok(mut register) => {
                register.tier = tier;
                registers.push(register);
            }
            Err(e) => {
                debug!(message = "skipping register entry", path = %path.display(), error = %e);
            }
        }
    }
    Ok(registers)
}

async fn read_required(path: &Path) -> Result<Vec<u8>, Error> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ConfigNotFound(e, path.to_path_buf()),
        _ => Error::ReadConfig(e, path.to_path_buf()),
    })
}

type Registers = Arc<[RegisterDefinition]>;

/// Per-key lazily loaded register lists. Concurrent requests for one key share a single load.
struct LazyCache<K> {
    cells: Mutex<HashMap<K, Arc<OnceCell<Registers>>>>,
}

impl<K> Default for LazyCache<K> {
    fn default() -> Self {
        Self { cells: Mutex::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash> LazyCache<K> {
    async fn get_or_load<F, Fut>(&self, key: K, load: F) -> Registers
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Registers>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(key).or_default())
        };
        Arc::clone(cell.get_or_init(load).await)
    }

    fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.values().filter(|c| c.initialized()).count()
    }
}

/// All register definitions and value tables of one catalog location.
///
/// The universal registers and value tables are read up front; device and equipment files are read
/// on first use and kept for the lifetime of the catalog. Switching to another location means
/// loading a new `Catalog`.
pub struct Catalog {
    path: PathBuf,
    universal: Registers,
    tables: Arc<ValueTables>,
    devices: LazyCache<&'static str>,
    equipment: LazyCache<EquipmentCategory>,
    file_loads: AtomicUsize,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("path", &self.path)
            .field("universal", &self.universal.len())
            .field("tables", &self.tables.len())
            .field("devices", &self.devices.len())
            .field("equipment", &self.equipment.len())
            .finish()
    }
}

impl Catalog {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let universal_path = path.join(UNIVERSAL_FILE);
        let content = read_required(&universal_path).await?;
        let universal = parse_registers(&content, SourceTier::Universal, &universal_path)
            .map_err(|e| Error::ConfigParse(e, universal_path.clone()))?;

        let tables_path = path.join(VALUE_TABLES_FILE);
        let content = read_required(&tables_path).await?;
        let tables: ValueTables = serde_json::from_slice::<ValueTablesDocument>(&content)
            .map_err(|e| Error::ConfigParse(e, tables_path.clone()))?
            .into();

        info!(
            message = "loaded catalog",
            path = %path.display(),
            universal_registers = universal.len(),
            value_tables = tables.len()
        );
        Ok(Self {
            path,
            universal: universal.into(),
            tables: Arc::new(tables),
            devices: LazyCache::default(),
            equipment: LazyCache::default(),
            file_loads: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn universal_registers(&self) -> Registers {
        Arc::clone(&self.universal)
    }

    pub fn value_tables(&self) -> &Arc<ValueTables> {
        &self.tables
    }

    pub fn converter(&self) -> ValueConverter {
        ValueConverter::new(Arc::clone(&self.tables))
    }

    /// Number of device and equipment files read so far.
    pub fn file_loads(&self) -> usize {
        self.file_loads.load(Ordering::Relaxed)
    }

    /// Registers specific to `device_type`; empty for device types without a dedicated file.
    pub async fn device_registers(&self, device_type: &str) -> Registers {
        let Some(file) = device_file(device_type) else {
            warn!(message = "unknown device type, no device registers", device_type);
            return Vec::new().into();
        };
        let path = self.path.join(DEVICES_DIR).join(file);
        self.devices
            .get_or_load(file, || self.read_optional(path, SourceTier::Device))
            .await
    }

    pub async fn equipment_registers(&self, category: EquipmentCategory) -> Registers {
        let path = self.path.join(EQUIPMENT_DIR).join(category.file_name());
        self.equipment
            .get_or_load(category, || self.read_optional(path, SourceTier::Equipment))
            .await
    }

    /// Like [`Self::equipment_registers`], addressing the category by its catalog name
    /// (`Heizkreise`) or identifier (`heating_circuits`).
    pub async fn equipment_registers_by_name(&self, name: &str) -> Registers {
        let category = EquipmentCategory::from_catalog_name(name).or_else(|| name.parse().ok());
        match category {
            Some(category) => self.equipment_registers(category).await,
            None => {
                warn!(message = "unknown equipment type, no equipment registers", equipment = name);
                Vec::new().into()
            }
        }
    }

    /// Read a device or equipment file. Missing or malformed files yield an empty list.
    async fn read_optional(&self, path: PathBuf, tier: SourceTier) -> Registers {
        self.file_loads.fetch_add(1, Ordering::Relaxed);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(message = "catalog file not found, no registers", path = %path.display());
                return Vec::new().into();
            }
            Err(e) => {
                warn!(message = "could not read catalog file", path = %path.display(), error = %e);
                return Vec::new().into();
            }
        };
        match parse_registers(&content, tier, &path) {
            Ok(registers) => {
                debug!(
                    message = "loaded catalog file",
                    path = %path.display(),
                    registers = registers.len()
                );
                registers.into()
            }
            Err(e) => {
                warn!(
                    message = "malformed catalog file, no registers",
                    path = %path.display(),
                    error = %e
                );
                Vec::new().into()
            }
        }
    }
}
