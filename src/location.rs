use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::language::LanguageConfig;
use crate::version::{RawVersion, VersionCatalog};

/// A resolved `(version, language)` catalog directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct CatalogLocation {
    pub version: String,
    pub language: String,
    pub path: PathBuf,
}

impl std::fmt::Display for CatalogLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) at {}", self.version, self.language, self.path.display())
    }
}

/// Maps firmware versions and locales onto catalog directories below a base directory.
#[derive(Clone, Debug)]
pub struct CatalogLocator {
    base: PathBuf,
    versions: VersionCatalog,
    languages: LanguageConfig,
}

impl CatalogLocator {
    pub fn new(
        base: impl Into<PathBuf>,
        versions: VersionCatalog,
        languages: LanguageConfig,
    ) -> Self {
        Self {
            base: base.into(),
            versions,
            languages,
        }
    }

    /// Read the version and language mapping documents of `base`, falling back to built-ins.
    pub async fn load(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let versions = VersionCatalog::load(&base).await;
        let languages = LanguageConfig::load(&base).await;
        Self { base, versions, languages }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn versions(&self) -> &VersionCatalog {
        &self.versions
    }

    pub fn languages(&self) -> &LanguageConfig {
        &self.languages
    }

    /// The catalog location of `version` in `language`, both snapped to what the catalog supports.
    pub fn locate(&self, version: &str, language: &str) -> CatalogLocation {
        let version = self.versions.closest_version(version);
        let Some(profile) = self.versions.profile(&version) else {
            // `closest_version` only falls outside the catalog for a custom default version.
            let language = self.languages.normalize(language);
            let path = self.base.join(format!("versions/v{version}")).join(&language);
            return CatalogLocation { version, language, path };
        };
        let supported = &profile.supported_languages;
        let language = if supported.iter().any(|l| l == language) {
            language.to_string()
        } else {
            let resolved = self.languages.resolve_language(Some(language), None, supported);
            info!(
                message = "language not available for version",
                requested = language,
                version = %version,
                language = %resolved
            );
            resolved
        };
        let path = self.base.join(&profile.config_path).join(&language);
        CatalogLocation { version, language, path }
    }

    pub fn config_path(&self, version: &str, language: &str) -> PathBuf {
        self.locate(version, language).path
    }

    /// Resolve a raw firmware version and a language preference into a catalog location.
    ///
    /// `preference` may be `auto` or absent, in which case `locale_hint` and then the configured
    /// defaults decide.
    pub fn resolve_catalog_location(
        &self,
        raw: &RawVersion,
        preference: Option<&str>,
        locale_hint: Option<&str>,
    ) -> CatalogLocation {
        let parsed = self.versions.parse_version(raw);
        let version = self.versions.closest_version(&parsed);
        let supported = self.versions.supported_languages(&version);
        let language = self.languages.resolve_language(preference, locale_hint, &supported);
        let location = self.locate(&version, &language);
        debug!(
            message = "resolved catalog location",
            raw = %raw,
            version = %location.version,
            language = %location.language,
            path = %location.path.display()
        );
        location
    }

    /// Whether the catalog directory for `version` and `language` exists.
    pub async fn validate_config_exists(&self, version: &str, language: &str) -> bool {
        let path = self.config_path(version, language);
        tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir())
    }
}
