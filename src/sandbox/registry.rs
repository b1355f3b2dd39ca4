//! Language registry
//!
//! Static table of the languages the service knows how to run, built once at
//! startup from the defaults below plus deployment overrides.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::LanguagesConfig;
use crate::error::{Error, Result};

/// Placeholder replaced by the execution directory in environment values
pub const DIR_PLACEHOLDER: &str = "{dir}";

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Bash,
    Java,
    Go,
}

impl Language {
    /// Every language in the default table
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::JavaScript,
        Language::Bash,
        Language::Java,
        Language::Go,
    ];
}

impl std::str::FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "bash" | "sh" | "shell" => Ok(Language::Bash),
            "java" => Ok(Language::Java),
            "go" | "golang" => Ok(Language::Go),
            _ => Err(Error::InvalidInput(format!("Unsupported language: {}", s))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::Bash => write!(f, "bash"),
            Language::Java => write!(f, "java"),
            Language::Go => write!(f, "go"),
        }
    }
}

/// How to stage and run one language
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    /// Language this entry describes
    pub language: Language,
    /// Source file extension, including the dot
    pub extension: &'static str,
    /// File name the code is staged under inside the execution directory
    pub source_file: &'static str,
    /// Command run from inside the execution directory
    ///
    /// The same argv is used by both backends: the local backend runs it with
    /// the host execution directory as cwd, the container backend with the
    /// mounted one.
    pub command: Vec<String>,
    /// Extra environment; values may contain [`DIR_PLACEHOLDER`]
    pub env: Vec<(String, String)>,
    /// Container image providing the runtime
    pub image: String,
    /// Whether this deployment accepts the language at all
    pub supported: bool,
}

impl LanguageSpec {
    /// Program looked up on `PATH` by the local backend
    pub fn runtime(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Environment with the placeholder resolved against `dir`
    pub fn env_for(&self, dir: &str) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.replace(DIR_PLACEHOLDER, dir)))
            .collect()
    }

    fn builtin(language: Language) -> Self {
        match language {
            Language::Python => Self::entry(
                language,
                ".py",
                "main.py",
                &["python3", "main.py"],
                &[("PYTHONDONTWRITEBYTECODE", "1"), ("PYTHONUNBUFFERED", "1")],
                "python:3.11-slim",
                true,
            ),
            Language::JavaScript => Self::entry(
                language,
                ".js",
                "main.js",
                &["node", "main.js"],
                &[],
                "node:18-slim",
                true,
            ),
            Language::Bash => Self::entry(
                language,
                ".sh",
                "main.sh",
                &["bash", "main.sh"],
                &[],
                "bash:5.2",
                true,
            ),
            // The public class must be named Main
            Language::Java => Self::entry(
                language,
                ".java",
                "Main.java",
                &["sh", "-c", "javac Main.java && java -cp . Main"],
                &[],
                "openjdk:11-jdk-slim",
                false,
            ),
            Language::Go => Self::entry(
                language,
                ".go",
                "main.go",
                &["go", "run", "main.go"],
                &[
                    ("HOME", "{dir}"),
                    ("GOCACHE", "{dir}/.gocache"),
                    ("GOPATH", "{dir}/.gopath"),
                ],
                "golang:1.21-alpine",
                false,
            ),
        }
    }

    fn entry(
        language: Language,
        extension: &'static str,
        source_file: &'static str,
        command: &[&str],
        env: &[(&str, &str)],
        image: &str,
        supported: bool,
    ) -> Self {
        LanguageSpec {
            language,
            extension,
            source_file,
            command: command.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            image: image.to_string(),
            supported,
        }
    }
}

/// Public description of one registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub supported: bool,
    pub extension: String,
    pub image: String,
    /// Whether the runtime binary was found on this host's `PATH`
    pub local_runtime_available: bool,
}

/// Read-only language table
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    entries: BTreeMap<Language, LanguageSpec>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new(&LanguagesConfig::default(), &HashMap::new())
    }
}

impl LanguageRegistry {
    /// Build the table from the defaults plus deployment overrides
    ///
    /// Unknown names in the overrides are skipped; `disabled` wins over
    /// `enabled` when a language appears in both.
    pub fn new(languages: &LanguagesConfig, images: &HashMap<String, String>) -> Self {
        let mut entries: BTreeMap<Language, LanguageSpec> = Language::ALL
            .iter()
            .map(|&lang| (lang, LanguageSpec::builtin(lang)))
            .collect();

        for name in &languages.enabled {
            if let Some(spec) = name.parse().ok().and_then(|l: Language| entries.get_mut(&l)) {
                spec.supported = true;
            }
        }
        for name in &languages.disabled {
            if let Some(spec) = name.parse().ok().and_then(|l: Language| entries.get_mut(&l)) {
                spec.supported = false;
            }
        }
        for (name, image) in images {
            if let Some(spec) = name.parse().ok().and_then(|l: Language| entries.get_mut(&l)) {
                spec.image = image.clone();
            }
        }

        LanguageRegistry { entries }
    }

    /// Look up a language by name or alias
    pub fn resolve(&self, name: &str) -> Option<&LanguageSpec> {
        let language: Language = name.parse().ok()?;
        self.entries.get(&language)
    }

    /// Look up a language by enum
    pub fn get(&self, language: Language) -> Option<&LanguageSpec> {
        self.entries.get(&language)
    }

    /// Iterate over all entries in a stable order
    pub fn iter(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.entries.values()
    }

    /// Number of languages this deployment accepts
    pub fn supported_count(&self) -> usize {
        self.entries.values().filter(|s| s.supported).count()
    }

    /// Summary keyed by language name
    pub fn describe(&self) -> BTreeMap<String, LanguageInfo> {
        self.entries
            .values()
            .map(|spec| {
                (
                    spec.language.to_string(),
                    LanguageInfo {
                        supported: spec.supported,
                        extension: spec.extension.to_string(),
                        image: spec.image.clone(),
                        local_runtime_available: which::which(spec.runtime()).is_ok(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("js".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("Golang".parse::<Language>().unwrap(), Language::Go);
        assert!("unknown".parse::<Language>().is_err());
    }

    #[test]
    fn test_default_support_flags() {
        let registry = LanguageRegistry::default();
        assert!(registry.resolve("python").unwrap().supported);
        assert!(registry.resolve("javascript").unwrap().supported);
        assert!(!registry.resolve("java").unwrap().supported);
        assert!(!registry.resolve("go").unwrap().supported);
        assert!(registry.resolve("cobol").is_none());
        assert_eq!(registry.supported_count(), 3);
    }

    #[test]
    fn test_overrides() {
        let languages = LanguagesConfig {
            enabled: vec!["java".into(), "bash".into()],
            disabled: vec!["bash".into(), "nonsense".into()],
        };
        let images = HashMap::from([("py".to_string(), "python:3.12-alpine".to_string())]);
        let registry = LanguageRegistry::new(&languages, &images);

        assert!(registry.get(Language::Java).unwrap().supported);
        assert!(!registry.get(Language::Bash).unwrap().supported);
        assert_eq!(registry.get(Language::Python).unwrap().image, "python:3.12-alpine");
    }

    #[test]
    fn test_env_placeholder() {
        let registry = LanguageRegistry::default();
        let go = registry.get(Language::Go).unwrap();
        let env = go.env_for("/workspace/abc");
        assert!(env.contains(&("GOCACHE".to_string(), "/workspace/abc/.gocache".to_string())));
        assert_eq!(go.runtime(), "go");
    }

    #[test]
    fn test_describe() {
        let registry = LanguageRegistry::default();
        let info = registry.describe();
        assert_eq!(info.len(), 5);
        assert_eq!(info["python"].extension, ".py");
        assert!(info["python"].supported);
    }
}
