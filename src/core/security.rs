//! Install-source and script content checks
//!
//! Both checks are advisory heuristics built on substring matching. They
//! catch accidental or obvious risk (a plain-http URL, a loopback target, a
//! script that shells out) and provide no security boundary against a
//! determined author: an obfuscated script passes, a harmless script that
//! mentions `eval` in a comment is flagged.

use crate::config::SecurityConfig;
use crate::core::prompt::Prompter;
use crate::error::{DispatchError, Result};
use regex::RegexSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, instrument, warn};
use url::{Host, Url};

/// Accepted install URL, with an optional non-fatal warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlVerdict {
    pub warning: Option<String>,
}

/// Validates install URLs and scans script text
#[derive(Debug)]
pub struct SecurityGate {
    config: SecurityConfig,
    markers: RegexSet,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Result<Self> {
        let markers = RegexSet::new(config.risk_markers.iter().map(|m| regex::escape(m)))
            .map_err(|e| DispatchError::config(format!("Invalid risk marker: {e}")))?;
        Ok(Self { config, markers })
    }

    /// Check an install URL against the scheme allow-list and the blocked
    /// patterns. Unknown https hosts only produce a warning.
    #[instrument(skip(self))]
    pub fn validate_url(&self, raw: &str) -> Result<UrlVerdict> {
        let url = Url::parse(raw)
            .map_err(|e| DispatchError::security(format!("Invalid URL '{raw}': {e}")))?;

        let scheme = url.scheme();
        if !self.config.allowed_schemes.iter().any(|s| s == scheme) {
            return Err(DispatchError::security(format!(
                "URL scheme '{}' not allowed. Use: {}",
                scheme,
                self.config.allowed_schemes.join(", ")
            )));
        }

        let lowered = raw.to_lowercase();
        if let Some(pattern) = self
            .config
            .blocked_url_patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
        {
            return Err(DispatchError::security(format!(
                "Suspicious pattern detected: {pattern}"
            )));
        }

        let loopback = match url.host() {
            Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_unspecified(),
            Some(Host::Ipv6(ip)) => ip.is_loopback() || ip.is_unspecified(),
            // Non-special schemes (git, ssh) keep IP literals as opaque hosts
            Some(Host::Domain(domain)) => domain
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified()),
            None => false,
        };
        if loopback {
            return Err(DispatchError::security(
                "Suspicious pattern detected: loopback address",
            ));
        }

        let mut warning = None;
        if scheme == "https" {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            if host.is_empty() {
                return Err(DispatchError::security("Invalid hostname"));
            }

            let trusted = self
                .config
                .trusted_hosts
                .iter()
                .any(|t| host == *t || host.ends_with(&format!(".{t}")));
            if !trusted {
                let message = format!("Unknown git host '{host}'");
                warn!("{}", message);
                warning = Some(message);
            }
        }

        debug!("URL accepted: {}", raw);
        Ok(UrlVerdict { warning })
    }

    /// Risk markers found in a script, in configuration order.
    ///
    /// Missing or oversized files are rejected outright.
    #[instrument(skip(self))]
    pub fn scan_script(&self, path: &Path) -> Result<Vec<String>> {
        let metadata = std::fs::metadata(path)
            .map_err(|_| DispatchError::security(format!("File does not exist: {}", path.display())))?;

        if metadata.len() > self.config.max_script_size {
            return Err(DispatchError::security(format!(
                "File too large (>{}MB): {}",
                self.config.max_script_size / (1024 * 1024),
                path.display()
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| DispatchError::file_system("read script", path, e))?;
        let content = String::from_utf8_lossy(&bytes);

        Ok(self
            .markers
            .matches(&content)
            .into_iter()
            .map(|i| self.config.risk_markers[i].clone())
            .collect())
    }

    /// Scan a script and, when it contains risk markers, ask before
    /// accepting it. A declined confirmation rejects the script.
    pub fn validate_script(&self, path: &Path, prompter: &dyn Prompter) -> Result<()> {
        let findings = self.scan_script(path)?;
        if findings.is_empty() {
            debug!("Script appears safe: {}", path.display());
            return Ok(());
        }

        warn!(
            "Found potentially risky constructs in {}: {}",
            path.display(),
            findings.join(", ")
        );

        if prompter.confirm("Continue anyway?", false)? {
            Ok(())
        } else {
            Err(DispatchError::security(format!(
                "{} rejected by user (risky constructs: {})",
                path.display(),
                findings.join(", ")
            )))
        }
    }
}

/// Reject command folder names that would escape the community root
pub fn validate_folder_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('.');

    if invalid {
        return Err(DispatchError::validation(format!(
            "Invalid command name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::ScriptedPrompter;
    use std::fs;
    use tempfile::TempDir;

    fn gate() -> SecurityGate {
        SecurityGate::new(SecurityConfig::default()).unwrap()
    }

    fn rejection(result: Result<UrlVerdict>) -> String {
        match result {
            Err(DispatchError::SecurityRejected { reason }) => reason,
            other => panic!("Expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_trusted_https_url() {
        let verdict = gate().validate_url("https://github.com/acme/tool").unwrap();
        assert!(verdict.warning.is_none());

        let verdict = gate().validate_url("https://gitlab.com/acme/tool.git").unwrap();
        assert!(verdict.warning.is_none());
    }

    #[test]
    fn test_unknown_host_is_only_a_warning() {
        let verdict = gate().validate_url("https://git.example.org/acme/tool").unwrap();
        assert_eq!(
            verdict.warning.as_deref(),
            Some("Unknown git host 'git.example.org'")
        );

        let verdict = gate()
            .validate_url("https://github.com.example.org/acme/tool")
            .unwrap();
        assert!(verdict.warning.is_some());
    }

    #[test]
    fn test_git_and_ssh_schemes() {
        assert!(gate().validate_url("git://example.org/tool.git").is_ok());
        assert!(gate().validate_url("ssh://git@github.com/acme/tool.git").is_ok());
    }

    #[test]
    fn test_disallowed_schemes() {
        assert!(rejection(gate().validate_url("ftp://example.com/tool")).contains("'ftp'"));
        assert!(rejection(gate().validate_url("http://github.com/acme/tool")).contains("'http'"));
        assert!(rejection(gate().validate_url("file:///tmp/repo")).contains("'file'"));
    }

    #[test]
    fn test_unparseable_url() {
        assert!(rejection(gate().validate_url("git@github.com:acme/tool.git")).contains("Invalid URL"));
    }

    #[test]
    fn test_blocked_patterns() {
        assert!(rejection(gate().validate_url("https://localhost/acme/tool")).contains("localhost"));
        assert!(rejection(gate().validate_url("https://127.0.0.1/tool")).contains("127.0.0.1"));
        assert!(rejection(gate().validate_url("https://github.com/acme/../etc")).contains(".."));
        assert!(rejection(gate().validate_url("ssh://127.1.2.3/tool")).contains("loopback"));
    }

    #[test]
    fn test_clean_script_passes() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("greet.py");
        fs::write(&script, "def main(argv):\n    print('hi', argv)\n").unwrap();

        assert!(gate().scan_script(&script).unwrap().is_empty());

        let prompter = ScriptedPrompter::always(false);
        gate().validate_script(&script, &prompter).unwrap();
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_risky_script_requires_confirmation() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.py");
        fs::write(
            &script,
            "import subprocess\n\ndef main(argv):\n    subprocess.run(argv)\n    eval('1')\n",
        )
        .unwrap();

        assert_eq!(gate().scan_script(&script).unwrap(), vec!["subprocess", "eval"]);

        let accept = ScriptedPrompter::always(true);
        gate().validate_script(&script, &accept).unwrap();
        assert_eq!(accept.asked().len(), 1);

        let decline = ScriptedPrompter::always(false);
        let result = gate().validate_script(&script, &decline);
        assert!(matches!(result, Err(DispatchError::SecurityRejected { .. })));
    }

    #[test]
    fn test_oversized_script_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("big.py");
        fs::write(&script, "x".repeat(64)).unwrap();

        let config = SecurityConfig {
            max_script_size: 16,
            ..SecurityConfig::default()
        };
        let result = SecurityGate::new(config).unwrap().scan_script(&script);
        assert!(matches!(result, Err(DispatchError::SecurityRejected { .. })));
    }

    #[test]
    fn test_missing_script_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let result = gate().scan_script(&temp_dir.path().join("missing.py"));
        assert!(matches!(result, Err(DispatchError::SecurityRejected { .. })));
    }

    #[test]
    fn test_folder_names() {
        assert!(validate_folder_name("tool").is_ok());
        assert!(validate_folder_name("my-tool_2").is_ok());
        assert!(validate_folder_name("").is_err());
        assert!(validate_folder_name("..").is_err());
        assert!(validate_folder_name("a/b").is_err());
        assert!(validate_folder_name(".cache").is_err());
    }
}
