use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ordered::OrderedMap;

/// Input register carrying the controller's major firmware version.
pub const DEFAULT_VERSION_REGISTER: u16 = 8192;
pub const DEFAULT_VERSION: &str = "22.7.1";
pub const MAPPING_FILE: &str = "version_mapping.json";

const BUILTIN_VERSIONS: &[&str] = &["22.7.1", "25.7.1"];

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version pattern is a valid regex"));

fn default_version_register() -> u16 {
    DEFAULT_VERSION_REGISTER
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct RegisterLayouts {
    #[serde(default = "default_version_register")]
    pub software_version: u16,
}

impl Default for RegisterLayouts {
    fn default() -> Self {
        Self { software_version: DEFAULT_VERSION_REGISTER }
    }
}

/// One supported firmware version and where its catalogs live.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct VersionProfile {
    #[serde(skip_deserializing)]
    pub version: String,
    /// Relative to the catalog base directory; `versions/v{version}` when not given.
    #[serde(default)]
    pub config_path: String,
    #[serde(default = "default_languages")]
    pub supported_languages: Vec<String>,
    #[serde(default)]
    pub register_layouts: RegisterLayouts,
}

fn default_languages() -> Vec<String> {
    vec!["de".into(), "en".into()]
}

impl VersionProfile {
    fn builtin(version: &str) -> Self {
        Self {
            version: version.to_string(),
            config_path: format!("versions/v{version}"),
            supported_languages: default_languages(),
            register_layouts: RegisterLayouts::default(),
        }
    }
}

#[derive(Deserialize)]
struct MappingDocument {
    #[serde(default)]
    supported_versions: OrderedMap<VersionProfile>,
    #[serde(default)]
    fallback_rules: FallbackRules,
}

#[derive(Default, Deserialize)]
struct FallbackRules {
    #[serde(default)]
    default_version: Option<String>,
}

/// Raw firmware version as reported by the controller or typed by a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawVersion {
    /// The major version as read from the version register.
    Integer(i64),
    Text(String),
}

impl From<u16> for RawVersion {
    fn from(value: u16) -> Self {
        Self::Integer(value.into())
    }
}

impl From<&str> for RawVersion {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawVersion {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl std::str::FromStr for RawVersion {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl std::fmt::Display for RawVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawVersion::Integer(n) => write!(f, "{n}"),
            RawVersion::Text(s) => f.write_str(s),
        }
    }
}

type Triple = (u64, u64, u64);

fn triple(text: &str) -> Option<Triple> {
    let captures = VERSION_PATTERN.captures(text)?;
    let part = |i: usize| captures.get(i)?.as_str().parse::<u64>().ok();
    Some((part(1)?, part(2)?, part(3)?))
}

fn distance(a: Triple, b: Triple) -> u64 {
    a.0.abs_diff(b.0) * 10000 + a.1.abs_diff(b.1) * 100 + a.2.abs_diff(b.2)
}

/// Every firmware version a catalog tree supports, in mapping document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionCatalog {
    profiles: Vec<VersionProfile>,
    default_version: String,
}

impl Default for VersionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl VersionCatalog {
    /// The catalog used when no usable mapping document exists.
    pub fn builtin() -> Self {
        Self {
            profiles: BUILTIN_VERSIONS.iter().map(|v| VersionProfile::builtin(v)).collect(),
            default_version: DEFAULT_VERSION.to_string(),
        }
    }

    /// Build a catalog from profiles; an empty list yields the built-in catalog.
    pub fn new(profiles: Vec<VersionProfile>, default_version: Option<String>) -> Self {
        if profiles.is_empty() {
            return Self::builtin();
        }
        let profiles = profiles
            .into_iter()
            .map(|mut p| {
                if p.config_path.is_empty() {
                    p.config_path = format!("versions/v{}", p.version);
                }
                p
            })
            .collect();
        Self {
            profiles,
            default_version: default_version.unwrap_or_else(|| DEFAULT_VERSION.into()),
        }
    }

    /// Load `version_mapping.json` from `base`. Never fails: any problem yields the built-in
    /// catalog.
    pub async fn load(base: &Path) -> Self {
        let path = base.join(MAPPING_FILE);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) => {
                info!(
                    message = "version mapping unavailable, using built-in versions",
                    path = %path.display(),
                    error = %e
                );
                return Self::builtin();
            }
        };
        match serde_json::from_slice::<MappingDocument>(&content) {
            Ok(document) => {
                let OrderedMap(entries) = document.supported_versions;
                let profiles = entries
                    .into_iter()
                    .map(|(version, mut profile)| {
                        profile.version = version;
                        profile
                    })
                    .collect::<Vec<_>>();
                debug!(message = "loaded version mapping", versions = profiles.len());
                Self::new(profiles, document.fallback_rules.default_version)
            }
            Err(e) => {
                warn!(
                    message = "malformed version mapping, using built-in versions",
                    path = %path.display(),
                    error = %e
                );
                Self::builtin()
            }
        }
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    /// Normalise a raw firmware version into `major.minor.patch`.
    ///
    /// The controller only reports its major version, so integers are completed with the `.7.1`
    /// release suffix. Text without a `major.minor.patch` group yields the default version.
    pub fn parse_version(&self, raw: &RawVersion) -> String {
        match raw {
            RawVersion::Integer(major) => format!("{major}.7.1"),
            RawVersion::Text(text) => {
                let text = text.trim().to_uppercase();
                let text = text.strip_prefix('V').unwrap_or(&text);
                match VERSION_PATTERN.find(text) {
                    Some(m) => m.as_str().to_string(),
                    None => {
                        warn!(
                            message = "unrecognised firmware version, using default",
                            raw = text,
                            default = %self.default_version
                        );
                        self.default_version.clone()
                    }
                }
            }
        }
    }

    /// The supported version nearest to `target`; exact matches are returned as-is.
    pub fn closest_version(&self, target: &str) -> String {
        if self.profile(target).is_some() {
            return target.to_string();
        }
        let Some(wanted) = triple(target) else {
            return self.default_version.clone();
        };
        let mut best: Option<(&str, u64)> = None;
        for profile in &self.profiles {
            let Some(candidate) = triple(&profile.version) else { continue };
            let d = distance(wanted, candidate);
            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((profile.version.as_str(), d));
            }
        }
        match best {
            Some((version, _)) => {
                info!(message = "using closest supported version", requested = target, version);
                version.to_string()
            }
            None => self.default_version.clone(),
        }
    }

    pub fn profile(&self, version: &str) -> Option<&VersionProfile> {
        self.profiles.iter().find(|p| p.version == version)
    }

    /// Profile of the version nearest to `version`.
    pub fn closest_profile(&self, version: &str) -> Option<&VersionProfile> {
        self.profile(&self.closest_version(version))
    }

    pub fn supported_versions(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.version.as_str())
    }

    pub fn supported_languages(&self, version: &str) -> Vec<String> {
        self.closest_profile(version)
            .map(|p| p.supported_languages.clone())
            .unwrap_or_else(default_languages)
    }

    /// Register holding the firmware version. Versions not in the catalog use the default register.
    pub fn version_register_address(&self, version: Option<&str>) -> u16 {
        version
            .and_then(|v| self.profile(v))
            .map_or(DEFAULT_VERSION_REGISTER, |p| p.register_layouts.software_version)
    }
}
