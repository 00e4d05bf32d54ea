use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

pub const LANGUAGE_FILE: &str = "language_config.json";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Preference value that defers to the locale hint.
pub const AUTO: &str = "auto";

const BUILTIN_MAPPING: &[(&str, &str)] = &[
    ("de", "de"),
    ("de-de", "de"),
    ("de-at", "de"),
    ("de-ch", "de"),
    ("en", "en"),
    ("en-us", "en"),
    ("en-gb", "en"),
];

#[derive(Deserialize)]
struct LanguageDocument {
    #[serde(default)]
    language_detection: Detection,
    #[serde(default)]
    language_mapping: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct Detection {
    #[serde(default = "enabled")]
    use_ha_locale: bool,
    #[serde(default = "default_language")]
    fallback_language: String,
}

impl Default for Detection {
    fn default() -> Self {
        Self { use_ha_locale: true, fallback_language: default_language() }
    }
}

fn enabled() -> bool {
    true
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Locale to catalog language mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageConfig {
    /// Keys are lower-case locale tags.
    mapping: HashMap<String, String>,
    default_language: String,
    use_locale: bool,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageConfig {
    pub fn builtin() -> Self {
        Self {
            mapping: BUILTIN_MAPPING.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            default_language: default_language(),
            use_locale: true,
        }
    }

    pub fn new(
        mapping: impl IntoIterator<Item = (String, String)>,
        default_language: impl Into<String>,
        use_locale: bool,
    ) -> Self {
        Self {
            mapping: mapping.into_iter().map(|(k, v)| (k.trim().to_lowercase(), v)).collect(),
            default_language: default_language.into(),
            use_locale,
        }
    }

    /// Load `language_config.json` from `base`. Never fails: any problem yields the built-in
    /// mapping.
    pub async fn load(base: &Path) -> Self {
        let path = base.join(LANGUAGE_FILE);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    message = "language config unavailable, using defaults",
                    path = %path.display(),
                    error = %e
                );
                return Self::builtin();
            }
        };
        match serde_json::from_slice::<LanguageDocument>(&content) {
            Ok(document) => {
                info!(message = "loaded language configuration", path = %path.display());
                let detection = document.language_detection;
                match document.language_mapping {
                    Some(mapping) => {
                        Self::new(mapping, detection.fallback_language, detection.use_ha_locale)
                    }
                    None => Self {
                        default_language: detection.fallback_language,
                        use_locale: detection.use_ha_locale,
                        ..Self::builtin()
                    },
                }
            }
            Err(e) => {
                warn!(
                    message = "malformed language config, using defaults",
                    path = %path.display(),
                    error = %e
                );
                Self::builtin()
            }
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn uses_locale(&self) -> bool {
        self.use_locale
    }

    /// Map a locale tag such as `de-AT` onto a catalog language, falling back to the default.
    pub fn normalize(&self, language: &str) -> String {
        let language = language.trim().to_lowercase();
        if language.is_empty() {
            return self.default_language.clone();
        }
        if let Some(mapped) = self.mapping.get(&language) {
            return mapped.clone();
        }
        let primary = language.split('-').next().unwrap_or_default();
        if let Some(mapped) = self.mapping.get(primary) {
            return mapped.clone();
        }
        warn!(
            message = "language not supported, using default",
            language = %language,
            default = %self.default_language
        );
        self.default_language.clone()
    }

    /// Pick the catalog language for a version supporting `supported`.
    ///
    /// An explicit preference wins, then the locale hint (when enabled), then the default language,
    /// then the first supported language.
    pub fn resolve_language(
        &self,
        preference: Option<&str>,
        locale_hint: Option<&str>,
        supported: &[String],
    ) -> String {
        let is_supported = |language: &str| supported.iter().any(|s| s == language);
        if let Some(preference) = preference.filter(|p| !p.is_empty() && *p != AUTO) {
            let language = self.normalize(preference);
            if is_supported(language.as_str()) {
                debug!(message = "using preferred language", language = %language);
                return language;
            }
        }
        if self.use_locale {
            if let Some(locale) = locale_hint.filter(|l| !l.is_empty()) {
                let language = self.normalize(locale);
                if is_supported(language.as_str()) {
                    debug!(message = "using locale language", language = %language);
                    return language;
                }
            }
        }
        if is_supported(self.default_language.as_str()) {
            return self.default_language.clone();
        }
        supported.first().cloned().unwrap_or_else(default_language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalizes_locale_tags() {
        let config = LanguageConfig::builtin();
        assert_eq!(config.normalize("de-AT"), "de");
        assert_eq!(config.normalize(" EN-us "), "en");
        assert_eq!(config.normalize("de-LU"), "de");
        assert_eq!(config.normalize("fr-FR"), "en");
        assert_eq!(config.normalize(""), "en");
    }

    #[test]
    fn resolution_order() {
        let config = LanguageConfig::builtin();
        let both = langs(&["de", "en"]);
        assert_eq!(config.resolve_language(Some("de"), Some("en-US"), &both), "de");
        assert_eq!(config.resolve_language(Some("auto"), Some("de-CH"), &both), "de");
        assert_eq!(config.resolve_language(None, Some("de-CH"), &both), "de");
        assert_eq!(config.resolve_language(Some("fr"), None, &both), "en");
        assert_eq!(config.resolve_language(None, None, &langs(&["de"])), "de");
        assert_eq!(config.resolve_language(Some("en"), None, &langs(&["de"])), "de");
        assert_eq!(config.resolve_language(None, None, &[]), "en");

        let no_locale = LanguageConfig::new(
            BUILTIN_MAPPING.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            "en",
            false,
        );
        assert_eq!(no_locale.resolve_language(None, Some("de-DE"), &both), "en");
    }

    #[tokio::test]
    async fn loads_mapping_document() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LanguageConfig::load(dir.path()).await, LanguageConfig::builtin());

        let json = r#"{
            "language_detection": {"use_ha_locale": false, "fallback_language": "de"},
            "language_mapping": {"de-DE": "de", "EN": "en"}
        }"#;
        std::fs::write(dir.path().join(LANGUAGE_FILE), json).unwrap();
        let config = LanguageConfig::load(dir.path()).await;
        assert_eq!(config.default_language(), "de");
        assert!(!config.uses_locale());
        assert_eq!(config.normalize("de-de"), "de");
        assert_eq!(config.normalize("en-GB"), "en");
        assert_eq!(config.normalize("it"), "de");

        std::fs::write(dir.path().join(LANGUAGE_FILE), "[").unwrap();
        assert_eq!(LanguageConfig::load(dir.path()).await, LanguageConfig::builtin());
    }
}
