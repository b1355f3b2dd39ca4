//! Security policy engine
//!
//! A cheap textual pre-filter run before any process or container starts.
//! Source is lowercased and searched for deny-listed tokens; it is not
//! parsed, so obfuscated code (string concatenation, encoding) can slip
//! through. Kernel-level isolation is the container backend's job.
//!
//! Deny-lists are built cumulatively, each tier starting from the one below
//! it, so `Low ⊆ Medium ⊆ High ⊆ Maximum` holds by construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Error;
use crate::sandbox::limits::ResourceLimits;
use crate::sandbox::registry::Language;

/// Security tier of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

impl SecurityLevel {
    /// All tiers, least restrictive first
    pub const ALL: [SecurityLevel; 4] = [
        SecurityLevel::Low,
        SecurityLevel::Medium,
        SecurityLevel::High,
        SecurityLevel::Maximum,
    ];
}

impl std::str::FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(SecurityLevel::Low),
            "medium" => Ok(SecurityLevel::Medium),
            "high" => Ok(SecurityLevel::High),
            "maximum" | "max" => Ok(SecurityLevel::Maximum),
            _ => Err(Error::InvalidInput(format!(
                "Invalid security level: {}. Valid: low, medium, high, maximum",
                s
            ))),
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityLevel::Low => write!(f, "low"),
            SecurityLevel::Medium => write!(f, "medium"),
            SecurityLevel::High => write!(f, "high"),
            SecurityLevel::Maximum => write!(f, "maximum"),
        }
    }
}

/// Code rejected by a tier's deny-list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityViolation {
    /// Deny-listed token found in the source
    pub token: String,
    pub language: Language,
    pub level: SecurityLevel,
}

impl std::fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "forbidden pattern '{}' for {} at security level {}",
            self.token, self.language, self.level
        )
    }
}

impl From<SecurityViolation> for Error {
    fn from(v: SecurityViolation) -> Self {
        Error::Security(v.to_string())
    }
}

/// Policy for one tier
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub level: SecurityLevel,
    /// Default limits when the request has no override
    pub limits: ResourceLimits,
    deny: HashMap<Language, Vec<&'static str>>,
}

impl SecurityPolicy {
    /// Deny-listed tokens for a language, lowercase
    pub fn forbidden(&self, language: Language) -> &[&'static str] {
        self.deny.get(&language).map(Vec::as_slice).unwrap_or_default()
    }

    fn find_violation(&self, code: &str, language: Language) -> Option<&'static str> {
        let haystack = code.to_lowercase();
        self.forbidden(language)
            .iter()
            .copied()
            .find(|token| haystack.contains(token))
    }
}

/// Tokens a tier adds on top of the tier below it
fn additions(level: SecurityLevel, language: Language) -> &'static [&'static str] {
    use Language::*;
    use SecurityLevel::*;

    match (level, language) {
        (Low, Python) => &[
            "import subprocess",
            "from subprocess",
            "os.system(",
            "os.popen(",
            "os.exec",
            "os.fork(",
            "__import__(",
        ],
        (Medium, Python) => &[
            "import shutil",
            "from shutil",
            "import socket",
            "from socket",
            "eval(",
            "exec(",
            "compile(",
        ],
        (High, Python) => &[
            "import os",
            "from os",
            "import sys",
            "from sys",
            "import ctypes",
            "importlib",
            "open(",
            "getattr(",
            "setattr(",
            "globals(",
        ],
        (Maximum, Python) => &[
            "import threading",
            "import multiprocessing",
            "import pickle",
            "import urllib",
            "import http",
            "__builtins__",
            "__class__",
            "__subclasses__",
            "input(",
        ],

        (Low, JavaScript) => &["child_process", "process.binding", "process.kill("],
        (Medium, JavaScript) => &[
            "require('fs')",
            "require(\"fs\")",
            "require('net')",
            "require(\"net\")",
            "require('http')",
            "require(\"http\")",
            "eval(",
            "new function(",
        ],
        (High, JavaScript) => &["require(", "import(", "process.env", "process.exit("],
        (Maximum, JavaScript) => &["globalthis", "constructor", "__proto__", "settimeout("],

        (Low, Bash) => &["rm -rf /", "mkfs", ":(){", "dd if=", "shutdown", "reboot"],
        (Medium, Bash) => &["curl ", "wget ", "nc ", "ssh ", "/dev/tcp"],
        (High, Bash) => &["sudo", "chmod", "chown", "/etc/", "kill "],
        (Maximum, Bash) => &["eval ", "exec ", "$(", "`", "source "],

        (Low, Java) => &["runtime.getruntime", "processbuilder"],
        (Medium, Java) => &["java.net", "system.exit"],
        (High, Java) => &["java.io.file", "java.nio.file", "java.lang.reflect"],
        (Maximum, Java) => &["classloader", "thread", "unsafe"],

        (Low, Go) => &["os/exec", "syscall"],
        (Medium, Go) => &["\"net", "\"unsafe\""],
        (High, Go) => &["\"os\"", "io/ioutil", "\"reflect\""],
        (Maximum, Go) => &["\"runtime", "\"plugin\"", "go func"],
    }
}

/// Default limits per tier, strictly tighter as the tier rises
fn tier_limits(level: SecurityLevel) -> ResourceLimits {
    let (memory_mb, cpu_percent, timeout_seconds, max_file_size_mb, max_files) = match level {
        SecurityLevel::Low => (256, 100.0, 30, 50, 100),
        SecurityLevel::Medium => (128, 50.0, 20, 10, 50),
        SecurityLevel::High => (64, 25.0, 10, 5, 20),
        SecurityLevel::Maximum => (32, 10.0, 5, 1, 10),
    };
    ResourceLimits {
        memory_mb,
        cpu_percent,
        timeout_seconds,
        max_file_size_mb,
        max_files,
    }
}

/// Immutable table of tier policies
#[derive(Debug, Clone)]
pub struct SecurityPolicyEngine {
    policies: HashMap<SecurityLevel, SecurityPolicy>,
}

impl Default for SecurityPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityPolicyEngine {
    /// Build every tier's policy
    pub fn new() -> Self {
        let mut policies = HashMap::new();
        let mut deny: HashMap<Language, Vec<&'static str>> = HashMap::new();

        for level in SecurityLevel::ALL {
            for language in Language::ALL {
                deny.entry(language)
                    .or_default()
                    .extend_from_slice(additions(level, language));
            }
            policies.insert(
                level,
                SecurityPolicy {
                    level,
                    limits: tier_limits(level),
                    deny: deny.clone(),
                },
            );
        }

        SecurityPolicyEngine { policies }
    }

    /// Policy of a tier
    pub fn policy(&self, level: SecurityLevel) -> &SecurityPolicy {
        // Every tier is inserted in `new`
        &self.policies[&level]
    }

    /// Check `code` against the tier's deny-list for `language`
    pub fn validate(
        &self,
        code: &str,
        language: Language,
        level: SecurityLevel,
    ) -> std::result::Result<(), SecurityViolation> {
        match self.policy(level).find_violation(code, language) {
            Some(token) => Err(SecurityViolation {
                token: token.to_string(),
                language,
                level,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("LOW".parse::<SecurityLevel>().unwrap(), SecurityLevel::Low);
        assert_eq!("max".parse::<SecurityLevel>().unwrap(), SecurityLevel::Maximum);
        assert!("paranoid".parse::<SecurityLevel>().is_err());
        assert_eq!(SecurityLevel::default(), SecurityLevel::Medium);
    }

    #[test]
    fn test_benign_code_passes_every_tier() {
        let engine = SecurityPolicyEngine::new();
        for level in SecurityLevel::ALL {
            assert!(engine.validate("print(1+1)", Language::Python, level).is_ok());
            assert!(engine
                .validate("console.log(2 * 21)", Language::JavaScript, level)
                .is_ok());
        }
    }

    #[test]
    fn test_violation_names_token() {
        let engine = SecurityPolicyEngine::new();
        let err = engine
            .validate("import subprocess\nsubprocess.run(['ls'])", Language::Python, SecurityLevel::Low)
            .unwrap_err();
        assert_eq!(err.token, "import subprocess");
        assert!(err.to_string().contains("import subprocess"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let engine = SecurityPolicyEngine::new();
        let err = engine
            .validate("x = EVAL('1')", Language::Python, SecurityLevel::Medium)
            .unwrap_err();
        assert_eq!(err.token, "eval(");
    }

    #[test]
    fn test_higher_tiers_reject_more() {
        let engine = SecurityPolicyEngine::new();
        let code = "import os\nprint(os.getcwd())";
        assert!(engine.validate(code, Language::Python, SecurityLevel::Low).is_ok());
        assert!(engine.validate(code, Language::Python, SecurityLevel::Medium).is_ok());
        assert!(engine.validate(code, Language::Python, SecurityLevel::High).is_err());
        assert!(engine.validate(code, Language::Python, SecurityLevel::Maximum).is_err());
    }

    #[test]
    fn test_tiers_are_nested() {
        let engine = SecurityPolicyEngine::new();
        for language in Language::ALL {
            for pair in SecurityLevel::ALL.windows(2) {
                let lower = engine.policy(pair[0]).forbidden(language);
                let higher = engine.policy(pair[1]).forbidden(language);
                assert!(higher.len() > lower.len());
                for token in lower {
                    // Anything rejected below is rejected above
                    assert!(higher.contains(token), "{} missing at {}", token, pair[1]);
                    assert!(engine.validate(token, language, pair[1]).is_err());
                }
            }
        }
    }

    #[test]
    fn test_tier_limits_shrink() {
        let engine = SecurityPolicyEngine::new();
        for pair in SecurityLevel::ALL.windows(2) {
            let lower = engine.policy(pair[0]).limits;
            let higher = engine.policy(pair[1]).limits;
            assert!(higher.memory_mb < lower.memory_mb);
            assert!(higher.cpu_percent < lower.cpu_percent);
            assert!(higher.timeout_seconds < lower.timeout_seconds);
            assert!(higher.max_file_size_mb < lower.max_file_size_mb);
            assert!(higher.max_files < lower.max_files);
            assert!(higher.validate().is_ok());
        }
    }
}
