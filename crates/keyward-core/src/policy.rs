//! Verification that `sudo` is configured to require a strong local factor.
//!
//! PAM policy files form a directed, possibly cyclic graph through include
//! directives. [`AuthPolicyVerifier`] walks that graph breadth-first from the
//! `sudo` entry file and succeeds as soon as one reachable file names a
//! strong-factor module (Touch ID on macOS, fprintd on Linux).

use std::{
    collections::{HashSet, VecDeque},
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

/// Default location of the host's PAM configuration.
pub const PAM_DIR: &str = "/etc/pam.d";
/// Policy file consulted by `sudo`.
pub const SUDO_POLICY: &str = "sudo";

/// Strong-factor module shipped by the current platform, if one is known.
pub fn platform_strong_factor() -> Option<&'static str> {
    if cfg!(target_os = "macos") {
        Some("pam_tid.so")
    } else if cfg!(target_os = "linux") {
        Some("pam_fprintd.so")
    } else {
        None
    }
}

/// One parsed policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicyNode {
    pub path: PathBuf,
    /// Files this one includes, resolved against the policy directory.
    pub includes: Vec<PathBuf>,
    pub strong_factor: bool,
}

/// Result of walking the policy graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyGraph {
    /// Nodes in the order they were visited.
    pub nodes: Vec<AuthPolicyNode>,
    /// First node that declared a strong-factor module.
    pub satisfied_by: Option<PathBuf>,
}

impl PolicyGraph {
    pub fn is_satisfied(&self) -> bool {
        self.satisfied_by.is_some()
    }
}

/// Line-oriented parser for PAM policy files.
#[derive(Debug, Clone)]
pub struct PolicyParser {
    policy_dir: PathBuf,
    modules: Vec<String>,
}

impl PolicyParser {
    pub fn new(policy_dir: impl Into<PathBuf>, modules: Vec<String>) -> Self {
        Self {
            policy_dir: policy_dir.into(),
            modules,
        }
    }

    pub fn parse(&self, path: &Path) -> io::Result<AuthPolicyNode> {
        let contents = fs::read_to_string(path)?;
        Ok(self.parse_str(path, &contents))
    }

    pub fn parse_str(&self, path: &Path, contents: &str) -> AuthPolicyNode {
        let mut node = AuthPolicyNode {
            path: path.to_path_buf(),
            includes: Vec::new(),
            strong_factor: false,
        };

        for line in contents.lines() {
            // `#` starts a comment that runs to the end of the line.
            let line = line.split_once('#').map_or(line, |(code, _)| code).trim();
            if line.is_empty() {
                continue;
            }
            if self.names_strong_factor(line) {
                node.strong_factor = true;
            }
            if let Some(name) = include_target(line) {
                node.includes.push(self.policy_dir.join(name));
            }
        }
        node
    }

    fn names_strong_factor(&self, line: &str) -> bool {
        line.split_whitespace().any(|token| {
            self.modules.iter().any(|module| {
                token == module
                    || token
                        .strip_suffix(module.as_str())
                        .is_some_and(|prefix| prefix.ends_with('/'))
            })
        })
    }
}

/// Extract the file named by `@include <name>` or `<type> include|substack <name>`.
fn include_target(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    let name = match tokens.next()? {
        "@include" => tokens.next()?,
        _ => match tokens.next()? {
            "include" | "substack" => tokens.next()?,
            _ => return None,
        },
    };
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(name)
}

/// Walks the PAM include graph looking for a strong-factor module.
#[derive(Debug, Clone)]
pub struct AuthPolicyVerifier {
    parser: PolicyParser,
    root: PathBuf,
}

impl AuthPolicyVerifier {
    pub fn new(
        policy_dir: impl Into<PathBuf>,
        root_name: &str,
        strong_factor_modules: Vec<String>,
    ) -> Self {
        let policy_dir = policy_dir.into();
        let root = policy_dir.join(root_name);
        Self {
            parser: PolicyParser::new(policy_dir, strong_factor_modules),
            root,
        }
    }

    /// Verifier for this host's `sudo` policy. On platforms without a known
    /// strong-factor module it has nothing to look for and always fails.
    pub fn for_host() -> Self {
        let modules = platform_strong_factor()
            .map(|m| vec![m.to_string()])
            .unwrap_or_default();
        Self::new(PAM_DIR, SUDO_POLICY, modules)
    }

    /// Also accept these modules as strong factors (e.g. `pam_u2f.so`).
    pub fn with_extra_modules(mut self, modules: impl IntoIterator<Item = String>) -> Self {
        self.parser.modules.extend(modules);
        self
    }

    pub fn check(&self) -> bool {
        let graph = self.inspect();
        if !graph.is_satisfied() {
            warn!(
                visited = graph.nodes.len(),
                "no strong-factor module found in the sudo policy chain"
            );
        }
        graph.is_satisfied()
    }

    /// Breadth-first walk from the root, stopping at the first strong factor.
    pub fn inspect(&self) -> PolicyGraph {
        let mut graph = PolicyGraph::default();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::from([self.root.clone()]);

        while let Some(candidate) = queue.pop_front() {
            // Canonical paths make symlinked aliases count as one file.
            let resolved = match fs::canonicalize(&candidate) {
                Ok(path) => path,
                Err(_) => {
                    debug!(path = %candidate.display(), "policy file missing, skipping");
                    continue;
                }
            };
            if !visited.insert(resolved.clone()) {
                continue;
            }

            let node = match self.parser.parse(&resolved) {
                Ok(node) => node,
                Err(err) => {
                    warn!(path = %resolved.display(), %err, "could not read policy file");
                    continue;
                }
            };
            debug!(path = %resolved.display(), "inspected policy file");

            if node.strong_factor {
                info!(path = %resolved.display(), "strong-factor module found");
                graph.satisfied_by = Some(resolved);
                graph.nodes.push(node);
                break;
            }

            queue.extend(node.includes.iter().cloned());
            graph.nodes.push(node);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(dir: &Path) -> AuthPolicyVerifier {
        AuthPolicyVerifier::new(dir, SUDO_POLICY, vec!["pam_fprintd.so".to_string()])
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).expect("write policy file");
    }

    #[test]
    fn finds_module_in_root_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "sudo",
            "#%PAM-1.0\nauth sufficient pam_fprintd.so\n@include common-auth\n",
        );
        assert!(verifier(dir.path()).check());
    }

    #[test]
    fn follows_includes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "@include common-auth\n");
        write(
            dir.path(),
            "common-auth",
            "auth [success=2 default=ignore] /usr/lib/security/pam_fprintd.so max-tries=1\n",
        );

        let graph = verifier(dir.path()).inspect();
        assert!(graph.is_satisfied());
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph
            .satisfied_by
            .expect("satisfied")
            .ends_with("common-auth"));
    }

    #[test]
    fn follows_pam_include_control() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "auth       include        sudo_local\n");
        write(dir.path(), "sudo_local", "auth sufficient pam_fprintd.so\n");
        assert!(verifier(dir.path()).check());
    }

    #[test]
    fn commented_module_does_not_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "sudo",
            "#auth sufficient pam_fprintd.so\n   # auth sufficient pam_fprintd.so\n\nauth required pam_unix.so\n",
        );
        assert!(!verifier(dir.path()).check());
    }

    #[test]
    fn trailing_comment_does_not_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "sudo",
            "auth required pam_unix.so # pam_fprintd.so\n@include common-auth#pam_fprintd.so\n",
        );
        write(dir.path(), "common-auth", "auth required pam_deny.so\n");

        let graph = verifier(dir.path()).inspect();
        assert!(!graph.is_satisfied());
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn similar_module_name_does_not_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "auth sufficient pam_fprintd.so.bak\n");
        assert!(!verifier(dir.path()).check());
    }

    #[test]
    fn include_cycle_terminates_without_module() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "@include other\n");
        write(dir.path(), "other", "@include sudo\n");

        let graph = verifier(dir.path()).inspect();
        assert!(!graph.is_satisfied());
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn include_cycle_terminates_with_module() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "@include other\n@include third\n");
        write(dir.path(), "other", "@include sudo\n");
        write(dir.path(), "third", "auth sufficient pam_fprintd.so\n");
        assert!(verifier(dir.path()).check());
    }

    #[test]
    fn missing_include_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "@include does-not-exist\n@include common-auth\n");
        write(dir.path(), "common-auth", "auth sufficient pam_fprintd.so\n");
        assert!(verifier(dir.path()).check());
    }

    #[test]
    fn missing_root_fails_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let graph = verifier(dir.path()).inspect();
        assert!(graph.nodes.is_empty());
        assert!(!graph.is_satisfied());
    }

    #[test]
    fn include_names_cannot_escape_policy_dir() {
        let parser = PolicyParser::new("/etc/pam.d", vec![]);
        let node = parser.parse_str(
            Path::new("/etc/pam.d/sudo"),
            "@include ../../tmp/evil\nauth include /tmp/evil\n@include common-auth\n",
        );
        assert_eq!(node.includes, vec![PathBuf::from("/etc/pam.d/common-auth")]);
    }

    #[test]
    fn extra_modules_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "auth sufficient pam_u2f.so cue\n");
        assert!(!verifier(dir.path()).check());
        assert!(verifier(dir.path())
            .with_extra_modules(["pam_u2f.so".to_string()])
            .check());
    }

    #[test]
    fn verifier_without_modules_never_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "sudo", "auth sufficient pam_fprintd.so\n");
        assert!(!AuthPolicyVerifier::new(dir.path(), SUDO_POLICY, Vec::new()).check());
    }
}
