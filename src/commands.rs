use std::path::PathBuf;

use crate::location::{CatalogLocation, CatalogLocator};
use crate::registers::{AccessLevel, EquipmentCategory, EquipmentConfig};
use crate::version::{self, RawVersion};

/// Where the catalogs live and which of them to use.
#[derive(clap::Parser)]
#[group(id = "commands::CatalogArgs")]
pub struct CatalogArgs {
    /// Directory with `version_mapping.json`, `language_config.json` and the versioned catalogs.
    #[arg(long, short = 'c', default_value = "config")]
    catalog: PathBuf,
    /// Controller firmware version, e.g. `22.7.1`, `V25.7.1` or just the major version `25`.
    #[arg(long, default_value = version::DEFAULT_VERSION)]
    firmware: String,
    /// Catalog language, or `auto` to derive it from `--locale`.
    #[arg(long, default_value = crate::language::AUTO)]
    language: String,
    /// Locale such as `de-AT`, consulted when the language is `auto`.
    #[arg(long)]
    locale: Option<String>,
}

impl CatalogArgs {
    fn raw_version(&self) -> RawVersion {
        match self.firmware.trim().parse::<i64>() {
            Ok(major) => RawVersion::Integer(major),
            Err(_) => RawVersion::Text(self.firmware.clone()),
        }
    }

    async fn locate(&self) -> (CatalogLocator, CatalogLocation) {
        let locator = CatalogLocator::load(&self.catalog).await;
        let location = locator.resolve_catalog_location(
            &self.raw_version(),
            Some(self.language.as_str()),
            self.locale.as_deref(),
        );
        (locator, location)
    }
}

/// Which registers of the catalog apply to the installation.
#[derive(clap::Parser)]
#[group(id = "commands::SelectionArgs")]
pub struct SelectionArgs {
    #[arg(long, short = 'l', value_enum, default_value_t = AccessLevel::User)]
    level: AccessLevel,
    /// Boiler model, e.g. `KWB CF 2`.
    #[arg(long, short = 'd', default_value = "")]
    device: String,
    #[arg(long, default_value_t = 0)]
    heating_circuits: u16,
    #[arg(long, default_value_t = 0)]
    buffer_storage: u16,
    #[arg(long, default_value_t = 0)]
    dhw_storage: u16,
    #[arg(long, default_value_t = 0)]
    secondary_heat_sources: u16,
    #[arg(long, default_value_t = 0)]
    circulation: u16,
    #[arg(long, default_value_t = 0)]
    solar: u16,
    #[arg(long, default_value_t = 0)]
    boiler_sequence: u16,
    #[arg(long, default_value_t = 0)]
    heat_meters: u16,
    #[arg(long, default_value_t = 0)]
    transfer_stations: u16,
}

impl SelectionArgs {
    fn equipment(&self) -> EquipmentConfig {
        use EquipmentCategory::*;
        EquipmentConfig::default()
            .with(HeatingCircuits, self.heating_circuits)
            .with(BufferStorage, self.buffer_storage)
            .with(DhwStorage, self.dhw_storage)
            .with(SecondaryHeatSources, self.secondary_heat_sources)
            .with(Circulation, self.circulation)
            .with(Solar, self.solar)
            .with(BoilerSequence, self.boiler_sequence)
            .with(HeatMeters, self.heat_meters)
            .with(TransferStations, self.transfer_stations)
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod registers {
    use std::sync::Arc;

    use crate::catalog::{self, Catalog};
    use crate::convert::{self, Presentation};
    use crate::output::Record;
    use crate::registers::{Mode, SourceTier};
    use crate::resolve::{RegisterResolver, ResolvedRegister};

    /// Resolve and list the registers of an installation.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        catalog: super::CatalogArgs,
        #[clap(flatten)]
        selection: super::SelectionArgs,
        #[clap(flatten)]
        output: crate::output::Args,
        /// Only list registers whose address, name or unit contains this text.
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not load the register catalog")]
        Catalog(#[source] catalog::Error),
        #[error("could not output the registers")]
        Output(#[source] crate::output::Error),
    }

    #[derive(serde::Serialize)]
    struct RegisterRecord<'a> {
        address: u16,
        name: &'a str,
        mode: Mode,
        data_type: Option<String>,
        unit: &'a str,
        presentation: Presentation,
        min: f64,
        max: f64,
        step: f64,
        source: SourceTier,
    }

    impl Record for RegisterRecord<'_> {
        const HEADERS: &'static [&'static str] =
            &["Address", "Name", "Mode", "Type", "Unit", "Kind", "Min", "Max", "Step", "Source"];

        fn columns(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.name.to_string(),
                self.mode.to_string(),
                self.data_type.as_deref().unwrap_or("?").to_string(),
                self.unit.to_string(),
                self.presentation.to_string(),
                self.min.to_string(),
                self.max.to_string(),
                self.step.to_string(),
                self.source.to_string(),
            ]
        }
    }

    fn is_match(register: &ResolvedRegister, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        register.address().to_string().contains(&pattern)
            || register.friendly_name.to_lowercase().contains(&pattern)
            || register.definition.unit_or_table.to_lowercase().contains(&pattern)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let registers = runtime.block_on(async {
            let (_, location) = args.catalog.locate().await;
            let catalog = Catalog::load(&location.path).await.map_err(Error::Catalog)?;
            let resolver = RegisterResolver::new(Arc::new(catalog));
            let registers = resolver
                .load_registers(
                    args.selection.level,
                    &args.selection.device,
                    &args.selection.equipment(),
                )
                .await;
            Ok::<_, Error>((registers, resolver.catalog().converter()))
        });
        let (registers, converter) = registers?;

        let mut output = args.output.open::<RegisterRecord>().map_err(Error::Output)?;
        for register in registers.iter() {
            if let Some(pattern) = &args.filter {
                if !is_match(register, pattern) {
                    continue;
                }
            }
            let definition = &register.definition;
            let bounds = convert::bounds(definition);
            let record = RegisterRecord {
                address: definition.address,
                name: &register.friendly_name,
                mode: register.mode,
                data_type: definition.data_type.map(|t| t.to_string()),
                unit: &definition.unit_or_table,
                presentation: converter.presentation(definition),
                min: bounds.min,
                max: bounds.max,
                step: bounds.step,
                source: definition.tier,
            };
            output.write(&record).map_err(Error::Output)?;
        }
        output.finish().map_err(Error::Output)?;
        Ok(())
    }
}

pub mod location {
    use crate::output::Record;

    /// Show which catalog directory a firmware version and language resolve to.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        catalog: super::CatalogArgs,
        #[clap(flatten)]
        output: crate::output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not output the catalog location")]
        Output(#[source] crate::output::Error),
    }

    #[derive(serde::Serialize)]
    struct LocationRecord<'a> {
        #[serde(flatten)]
        location: &'a crate::location::CatalogLocation,
        exists: bool,
        supported_versions: Vec<&'a str>,
    }

    impl Record for LocationRecord<'_> {
        const HEADERS: &'static [&'static str] =
            &["Version", "Language", "Path", "Exists", "Supported versions"];

        fn columns(&self) -> Vec<String> {
            vec![
                self.location.version.clone(),
                self.location.language.clone(),
                self.location.path.display().to_string(),
                self.exists.to_string(),
                self.supported_versions.join(", "),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let (locator, location, exists) = runtime.block_on(async {
            let (locator, location) = args.catalog.locate().await;
            let exists = locator
                .validate_config_exists(&location.version, &location.language)
                .await;
            (locator, location, exists)
        });
        let record = LocationRecord {
            location: &location,
            exists,
            supported_versions: locator.versions().supported_versions().collect(),
        };
        let mut output = args.output.open::<LocationRecord>().map_err(Error::Output)?;
        output.write(&record).map_err(Error::Output)?;
        output.finish().map_err(Error::Output)?;
        Ok(())
    }
}

pub mod convert {
    use std::sync::Arc;

    use crate::catalog::{self, Catalog};
    use crate::convert::{self, Value};
    use crate::output::Record;
    use crate::resolve::RegisterResolver;

    /// Convert between the raw wire value of a register and its meaning.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        catalog: super::CatalogArgs,
        #[clap(flatten)]
        selection: super::SelectionArgs,
        #[clap(flatten)]
        output: crate::output::Args,
        /// Register address.
        address: u16,
        /// Unsigned wire value to interpret.
        #[arg(long, conflicts_with = "value", required_unless_present = "value")]
        raw: Option<i64>,
        /// Value or value table label to encode.
        #[arg(long)]
        value: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not load the register catalog")]
        Catalog(#[source] catalog::Error),
        #[error("register {0} is not part of the resolved register set")]
        UnknownRegister(u16),
        #[error("could not convert the value")]
        Convert(#[source] convert::Error),
        #[error("could not output the conversion")]
        Output(#[source] crate::output::Error),
    }

    #[derive(serde::Serialize)]
    struct ConversionRecord<'a> {
        address: u16,
        name: &'a str,
        raw: i64,
        value: &'a Value,
        unit: Option<&'a str>,
    }

    impl Record for ConversionRecord<'_> {
        const HEADERS: &'static [&'static str] = &["Address", "Name", "Raw", "Value", "Unit"];

        fn columns(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.name.to_string(),
                self.raw.to_string(),
                self.value.to_string(),
                self.unit.unwrap_or_default().to_string(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let resolved = runtime.block_on(async {
            let (_, location) = args.catalog.locate().await;
            let catalog = Catalog::load(&location.path).await.map_err(Error::Catalog)?;
            let resolver = RegisterResolver::new(Arc::new(catalog));
            let registers = resolver
                .load_registers(
                    args.selection.level,
                    &args.selection.device,
                    &args.selection.equipment(),
                )
                .await;
            Ok::<_, Error>((registers, resolver.catalog().converter()))
        });
        let (registers, converter) = resolved?;
        let register = registers.get(args.address).ok_or(Error::UnknownRegister(args.address))?;
        let definition = &register.definition;

        let (raw, value) = match args.raw {
            Some(raw) => (raw, converter.raw_to_value(definition, raw)),
            None => {
                let value = Value::from_input(args.value.as_deref().unwrap_or_default());
                let raw = converter.value_to_raw(definition, &value).map_err(Error::Convert)?;
                (raw, value)
            }
        };
        let record = ConversionRecord {
            address: definition.address,
            name: &register.friendly_name,
            raw,
            value: &value,
            unit: converter.unit_of_measurement(&definition.unit_or_table),
        };
        let mut output = args.output.open::<ConversionRecord>().map_err(Error::Output)?;
        output.write(&record).map_err(Error::Output)?;
        output.finish().map_err(Error::Output)?;
        Ok(())
    }
}
