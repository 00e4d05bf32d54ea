use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::catalog::{self, Catalog};
use crate::convert::{self, Value, ValueConverter};
use crate::location::{CatalogLocation, CatalogLocator};
use crate::registers::{self, AccessLevel, DataType, EquipmentConfig};
use crate::resolve::{RegisterResolver, ResolvedRegister, ResolvedRegisterSet};
use crate::version::{RawVersion, VersionCatalog};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not load the register catalog")]
    Catalog(#[from] catalog::Error),
    #[error("controller request failed")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("register {0} is not part of the resolved register set")]
    UnknownRegister(u16),
    #[error("register {0} is not writable")]
    NotWritable(u16),
    #[error("reading register {0} returned no data")]
    EmptyResponse(u16),
    #[error("could not encode the value of register {1}")]
    Encode(#[source] registers::Error, u16),
    #[error("could not decode the value of register {1}")]
    Decode(#[source] registers::Error, u16),
    #[error("could not convert the value of register {1}")]
    Convert(#[source] convert::Error, u16),
}

/// Register access to the controller, e.g. a Modbus TCP client.
///
/// Implementations report failures and do not retry; callers decide whether to.
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read_registers(
        &self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, Self::Error>> + Send;

    fn write_register(
        &self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Write consecutive registers starting at `address`. Writes one register at a time by default.
    fn write_registers(
        &self,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            for (offset, value) in (0u16..).zip(values) {
                self.write_register(address.wrapping_add(offset), *value).await?;
            }
            Ok(())
        }
    }
}

fn transport_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> Error {
    Error::Transport(Box::new(e))
}

/// What a session exposes: access level, device model, installed equipment and language.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSettings {
    pub level: AccessLevel,
    /// Device model such as `KWB CF 2`; empty for none.
    pub device_type: String,
    pub equipment: EquipmentConfig,
    /// Explicit catalog language, `auto` or `None` to follow `locale`.
    pub language: Option<String>,
    pub locale: Option<String>,
}

/// Everything derived from one catalog location. Replaced as a whole on reload.
struct SessionState {
    raw_version: RawVersion,
    settings: SessionSettings,
    location: CatalogLocation,
    resolver: RegisterResolver,
    registers: Arc<ResolvedRegisterSet>,
}

/// Read the controller's firmware version register. Exactly one read, no retries.
pub async fn detect_version<T: Transport>(
    transport: &T,
    versions: &VersionCatalog,
) -> Result<RawVersion, Error> {
    let address = versions.version_register_address(None);
    debug!(message = "reading firmware version", address);
    let words = transport.read_registers(address, 1).await.map_err(transport_error)?;
    let word = words.first().copied().ok_or(Error::EmptyResponse(address))?;
    let raw = RawVersion::from(word);
    info!(
        message = "detected firmware version",
        raw = %raw,
        version = %versions.parse_version(&raw)
    );
    Ok(raw)
}

/// One controller: its transport, its resolved catalog location and register set.
pub struct DeviceSession<T> {
    transport: T,
    locator: CatalogLocator,
    state: RwLock<SessionState>,
    /// Held by a reload from reading the current settings until the new state is in place.
    reloading: Mutex<()>,
}

impl<T: Transport> DeviceSession<T> {
    /// Open a session. Without an explicit `version` the firmware version is read from the
    /// controller first.
    pub async fn open(
        transport: T,
        locator: CatalogLocator,
        settings: SessionSettings,
        version: Option<RawVersion>,
    ) -> Result<Self, Error> {
        let raw_version = match version {
            Some(version) => version,
            None => detect_version(&transport, locator.versions()).await?,
        };
        let state = Self::load_state(&locator, raw_version, settings).await?;
        Ok(Self {
            transport,
            locator,
            state: RwLock::new(state),
            reloading: Mutex::new(()),
        })
    }

    async fn load_state(
        locator: &CatalogLocator,
        raw_version: RawVersion,
        settings: SessionSettings,
    ) -> Result<SessionState, Error> {
        let location = locator.resolve_catalog_location(
            &raw_version,
            settings.language.as_deref(),
            settings.locale.as_deref(),
        );
        let catalog = Catalog::load(&location.path).await?;
        let resolver = RegisterResolver::new(Arc::new(catalog));
        let registers = resolver
            .load_registers(settings.level, &settings.device_type, &settings.equipment)
            .await;
        info!(
            message = "session ready",
            location = %location,
            registers = registers.len()
        );
        Ok(SessionState { raw_version, settings, location, resolver, registers })
    }

    /// Rebuild the session state and swap it in. Readers see either the old or the new state,
    /// and concurrent reloads apply one after another.
    async fn reload(
        &self,
        update: impl FnOnce(&mut RawVersion, &mut SessionSettings),
    ) -> Result<Arc<ResolvedRegisterSet>, Error> {
        let _reloading = self.reloading.lock().await;
        let (mut raw_version, mut settings) = {
            let state = self.state.read().await;
            (state.raw_version.clone(), state.settings.clone())
        };
        update(&mut raw_version, &mut settings);
        let new_state = Self::load_state(&self.locator, raw_version, settings).await?;
        let registers = Arc::clone(&new_state.registers);
        *self.state.write().await = new_state;
        Ok(registers)
    }

    pub async fn set_equipment(
        &self,
        equipment: EquipmentConfig,
    ) -> Result<Arc<ResolvedRegisterSet>, Error> {
        self.reload(|_, settings| settings.equipment = equipment).await
    }

    pub async fn set_language(
        &self,
        language: Option<String>,
    ) -> Result<Arc<ResolvedRegisterSet>, Error> {
        self.reload(|_, settings| settings.language = language).await
    }

    pub async fn set_version(
        &self,
        version: RawVersion,
    ) -> Result<Arc<ResolvedRegisterSet>, Error> {
        self.reload(|raw, _| *raw = version).await
    }

    pub async fn set_access_level(
        &self,
        level: AccessLevel,
    ) -> Result<Arc<ResolvedRegisterSet>, Error> {
        self.reload(|_, settings| settings.level = level).await
    }

    /// Read the firmware version again and reload if it resolves to another catalog location.
    pub async fn redetect_version(&self) -> Result<CatalogLocation, Error> {
        let raw = detect_version(&self.transport, self.locator.versions()).await?;
        let current = self.location().await;
        let versions = self.locator.versions();
        let version = versions.closest_version(&versions.parse_version(&raw));
        if version != current.version {
            self.set_version(raw).await?;
        }
        Ok(self.location().await)
    }

    pub async fn registers(&self) -> Arc<ResolvedRegisterSet> {
        Arc::clone(&self.state.read().await.registers)
    }

    pub async fn location(&self) -> CatalogLocation {
        self.state.read().await.location.clone()
    }

    pub async fn settings(&self) -> SessionSettings {
        self.state.read().await.settings.clone()
    }

    pub async fn converter(&self) -> ValueConverter {
        self.state.read().await.resolver.catalog().converter()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn register(&self, address: u16) -> Result<(ResolvedRegister, ValueConverter), Error> {
        let state = self.state.read().await;
        let register = state.registers.get(address).ok_or(Error::UnknownRegister(address))?;
        Ok((register.clone(), state.resolver.catalog().converter()))
    }

    /// Read `address` from the controller and convert it into its domain value.
    pub async fn read_value(&self, address: u16) -> Result<Value, Error> {
        let (register, converter) = self.register(address).await?;
        let definition = &register.definition;
        let words = self
            .transport
            .read_registers(address, definition.words())
            .await
            .map_err(transport_error)?;
        if words.is_empty() {
            return Err(Error::EmptyResponse(address));
        }
        let raw = definition
            .data_type
            .unwrap_or(DataType::U16)
            .assemble(&words)
            .map_err(|e| Error::Decode(e, address))?;
        Ok(converter.raw_to_value(definition, raw))
    }

    /// Convert `value` and write it to `address`. Returns the raw value written.
    pub async fn write_value(&self, address: u16, value: &Value) -> Result<i64, Error> {
        let (register, converter) = self.register(address).await?;
        if !register.mode.is_writable() {
            return Err(Error::NotWritable(address));
        }
        let definition = &register.definition;
        let raw = converter
            .value_to_raw(definition, value)
            .map_err(|e| Error::Convert(e, address))?;
        let words = definition
            .data_type
            .unwrap_or(DataType::U16)
            .split(raw)
            .map_err(|e| Error::Encode(e, address))?;
        debug!(message = "writing register", address, raw, words = ?words);
        match words[..] {
            [word] => self.transport.write_register(address, word).await,
            _ => self.transport.write_registers(address, &words).await,
        }
        .map_err(transport_error)?;
        Ok(raw)
    }
}
