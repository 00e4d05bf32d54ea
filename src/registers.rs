use serde::{Deserialize, Deserializer};
use strum::{EnumCount, IntoEnumIterator};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("value {0} does not fit into a {1} register")]
    OutOfRange(i64, DataType),
    #[error("expected {1} word(s) for a {0} register, got {2}")]
    WordCount(DataType, u16, usize),
}

/// Wire representation of a register as declared by the catalog's `unit` column.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DataType {
    U16,
    S16,
    U32,
    S32,
    F32,
    #[strum(to_string = "string", serialize = "str")]
    String,
}

impl DataType {
    /// Number of 16-bit wire registers a value of this type spans.
    pub const fn words(self) -> u16 {
        match self {
            Self::U32 | Self::S32 | Self::F32 => 2,
            Self::U16 | Self::S16 | Self::String => 1,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::S16 | Self::S32)
    }

    /// Reinterpret an unsigned wire integer as the two's complement value it encodes.
    ///
    /// Unsigned types pass through unchanged.
    pub const fn to_signed(self, raw: i64) -> i64 {
        match self {
            Self::S16 if raw > i16::MAX as i64 => raw - 0x1_0000,
            Self::S32 if raw > i32::MAX as i64 => raw - 0x1_0000_0000,
            _ => raw,
        }
    }

    /// Inverse of [`Self::to_signed`]: fold negative values back into the unsigned wire range.
    pub const fn to_unsigned(self, value: i64) -> i64 {
        match self {
            Self::S16 if value < 0 => value + 0x1_0000,
            Self::S32 if value < 0 => value + 0x1_0000_0000,
            _ => value,
        }
    }

    /// Combine the words read off the wire into one unsigned integer, high word first.
    pub fn assemble(self, words: &[u16]) -> Result<i64, Error> {
        match (self.words(), words) {
            (1, [word]) => Ok(i64::from(*word)),
            (2, [high, low]) => Ok(i64::from(*high) << 16 | i64::from(*low)),
            (expected, _) => Err(Error::WordCount(self, expected, words.len())),
        }
    }

    /// Split an unsigned wire integer into the words to be written, high word first.
    pub fn split(self, raw: i64) -> Result<Vec<u16>, Error> {
        if self.words() == 1 {
            let word = u16::try_from(raw).map_err(|_| Error::OutOfRange(raw, self))?;
            return Ok(vec![word]);
        }
        let value = u32::try_from(raw).map_err(|_| Error::OutOfRange(raw, self))?;
        Ok(vec![(value >> 16) as u16, value as u16])
    }
}

/// Access text of one privilege column (`user_level` or `expert_level`), kept as written.
///
/// Catalogs spell these inconsistently (`read`, `readwrite`, `read_write`, `rw`, `none`, ...),
/// so the predicates below match on content rather than on a closed set of spellings.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct AccessRight(String);

impl AccessRight {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn allows_read(&self) -> bool {
        self.0.to_lowercase().contains("read")
    }

    pub fn allows_write(&self) -> bool {
        let lower = self.0.to_lowercase();
        lower.contains("write") || lower.trim() == "rw"
    }

    /// Exactly a read-write grant, as opposed to e.g. a bare `write`.
    pub fn is_read_write(&self) -> bool {
        matches!(self.0.to_lowercase().trim(), "readwrite" | "read_write" | "rw")
    }
}

impl<'de> Deserialize<'de> for AccessRight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(Option::<String>::deserialize(deserializer)?.unwrap_or_default()))
    }
}

/// The access descriptor exposed for a resolved register: `R` or `RW`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Mode(u8);

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 & Self::R.0 != 0 {
            f.write_str("R")?;
        }
        if self.0 & Self::W.0 != 0 {
            f.write_str("W")?;
        }
        Ok(())
    }
}

impl Mode {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);

    /// `RW` if either privilege column grants write access, `R` otherwise.
    pub fn from_access(user: &AccessRight, expert: &AccessRight) -> Self {
        if user.allows_write() || expert.allows_write() { Self::RW } else { Self::R }
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

/// Privilege tier of the caller.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Default,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[strum(ascii_case_insensitive)]
pub enum AccessLevel {
    #[default]
    #[strum(to_string = "UserLevel", serialize = "user")]
    User,
    #[strum(to_string = "ExpertLevel", serialize = "expert")]
    Expert,
}

impl AccessLevel {
    pub fn permits(self, register: &RegisterDefinition) -> bool {
        match self {
            Self::Expert => true,
            Self::User => register.user_level.allows_read(),
        }
    }
}

/// Which catalog file a definition came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceTier {
    #[default]
    Universal,
    Device,
    Equipment,
}

/// Optional sub-systems of an installation, in resolution priority order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::EnumCount,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EquipmentCategory {
    HeatingCircuits,
    BufferStorage,
    DhwStorage,
    SecondaryHeatSources,
    Circulation,
    Solar,
    BoilerSequence,
    HeatMeters,
    TransferStations,
}

impl EquipmentCategory {
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::HeatingCircuits => "heizkreise.json",
            Self::BufferStorage => "pufferspeicher.json",
            Self::DhwStorage => "brauchwasser.json",
            Self::SecondaryHeatSources => "zweitwaermequellen.json",
            Self::Circulation => "zirkulation.json",
            Self::Solar => "solar.json",
            Self::BoilerSequence => "kesselfolge.json",
            Self::HeatMeters => "waermemengenzaehler.json",
            Self::TransferStations => "uebergabestationen.json",
        }
    }

    /// The category's name as used by the vendor catalog.
    pub const fn catalog_name(self) -> &'static str {
        match self {
            Self::HeatingCircuits => "Heizkreise",
            Self::BufferStorage => "Pufferspeicher",
            Self::DhwStorage => "Brauchwasserspeicher",
            Self::SecondaryHeatSources => "Zweitwärmequellen",
            Self::Circulation => "Zirkulation",
            Self::Solar => "Solar",
            Self::BoilerSequence => "Kesselfolgeschaltung",
            Self::HeatMeters => "Wärmemengenzähler",
            Self::TransferStations => "Übergabestationen",
        }
    }

    pub fn from_catalog_name(name: &str) -> Option<Self> {
        Self::iter().find(|c| c.catalog_name() == name)
    }
}

/// Installed instance count per equipment category. A count of zero excludes the category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EquipmentConfig {
    counts: [u16; <EquipmentCategory as EnumCount>::COUNT],
}

impl EquipmentConfig {
    pub fn count(&self, category: EquipmentCategory) -> u16 {
        self.counts[category as usize]
    }

    pub fn set(&mut self, category: EquipmentCategory, count: u16) {
        self.counts[category as usize] = count;
    }

    pub fn with(mut self, category: EquipmentCategory, count: u16) -> Self {
        self.set(category, count);
        self
    }

    /// Categories with a non-zero count, in resolution priority order.
    pub fn installed(&self) -> impl Iterator<Item = (EquipmentCategory, u16)> + '_ {
        EquipmentCategory::iter()
            .map(|c| (c, self.count(c)))
            .filter(|&(_, count)| count > 0)
    }
}

impl std::fmt::Display for EquipmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (category, count) in self.installed() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{category}={count}")?;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// One register as declared by a catalog file.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RegisterDefinition {
    #[serde(rename = "starting_address", deserialize_with = "deserialize_address")]
    pub address: u16,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    /// `None` when the catalog names a type this crate does not know.
    #[serde(
        rename = "unit",
        default = "default_data_type",
        deserialize_with = "deserialize_data_type"
    )]
    pub data_type: Option<DataType>,
    /// Empty, a physical unit / scaling pattern such as `1/10°C`, or a value table name.
    #[serde(rename = "unit_value_table", default, deserialize_with = "null_as_empty")]
    pub unit_or_table: String,
    #[serde(default)]
    pub user_level: AccessRight,
    #[serde(default)]
    pub expert_level: AccessRight,
    /// Equipment instance token, e.g. `HK 1.1` or `PUF 0`.
    #[serde(rename = "index", default, deserialize_with = "empty_as_none")]
    pub equipment_index: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub min: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub max: Option<f64>,
    /// Modbus function code text: `04` for input registers, `03` for holding registers.
    #[serde(rename = "data_type", default, deserialize_with = "empty_as_none")]
    pub function_code: Option<String>,
    #[serde(skip_deserializing)]
    pub tier: SourceTier,
}

impl RegisterDefinition {
    pub fn new(address: u16, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            address,
            name: name.into(),
            data_type: Some(data_type),
            unit_or_table: String::new(),
            user_level: AccessRight::default(),
            expert_level: AccessRight::default(),
            equipment_index: None,
            min: None,
            max: None,
            function_code: None,
            tier: SourceTier::Universal,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.unit_or_table = token.into();
        self
    }

    pub fn with_access(mut self, user: &str, expert: &str) -> Self {
        self.user_level = AccessRight::new(user);
        self.expert_level = AccessRight::new(expert);
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.equipment_index = Some(index.into());
        self
    }

    pub fn mode(&self) -> Mode {
        Mode::from_access(&self.user_level, &self.expert_level)
    }

    /// Words to read for this register; unknown types are read as a single word.
    pub fn words(&self) -> u16 {
        self.data_type.map_or(1, DataType::words)
    }

    pub fn is_input_register(&self) -> bool {
        self.function_code.as_deref().is_some_and(|c| c.contains("04"))
    }
}

fn deserialize_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Address {
        Number(u64),
        Text(String),
    }
    let address = match Address::deserialize(deserializer)? {
        Address::Number(n) => u16::try_from(n).ok(),
        Address::Text(text) => text.trim().parse::<u16>().ok(),
    };
    address.ok_or_else(|| serde::de::Error::custom("register address is not a number in 0..=65535"))
}

fn default_data_type() -> Option<DataType> {
    Some(DataType::U16)
}

fn deserialize_data_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DataType>, D::Error> {
    Ok(match Option::<String>::deserialize(deserializer)? {
        None => default_data_type(),
        Some(token) => token.trim().parse().ok(),
    })
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

fn deserialize_bound<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}
