//! Safety validation for shell commands and write paths.
//!
//! Verdicts are pure functions of their inputs: the command catalogs are
//! static, and path checks resolve lexically against an explicit
//! [`PathContext`] instead of reading process state.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Command prefixes that are always allowed (toolchains, package managers, VCS, builds).
const ALLOWED_COMMAND_PATTERNS: &[&str] = &[
    r"^pip3?\s+(install|uninstall|list|show|freeze)\b",
    r"^npm\s+(install|uninstall|update|run|test|start|build)\b",
    r"^yarn\s+(install|add|remove|run|test|build)\b",
    r"^pnpm\s+(install|add|remove|run|test)\b",
    r"^python3?\s+",
    r"^node\s+",
    r"^git\s+",
    r"^cargo\s+(build|run|test|install|check|fmt|clippy)\b",
    r"^go\s+(run|build|test|get)\b",
    r"^rustc\s+",
    r"^javac?\s+",
    r"^gcc\s+",
    r"^g\+\+\s+",
    r"^make\b",
    r"^cmake\s+",
    r"^docker\s+(run|build|exec|ps|logs|compose)\b",
    r"^kubectl\s+",
];

/// A dangerous command shape with an explanation and a safer alternative.
#[derive(Debug, Clone, Copy)]
pub struct ForbiddenPattern {
    pub pattern: &'static str,
    /// When the `target` capture matches this pattern, the hit is ignored.
    pub unless_target: Option<&'static str>,
    pub reason: &'static str,
    pub alternative: &'static str,
}

const FORBIDDEN_COMMANDS: &[ForbiddenPattern] = &[
    // Destructive filesystem operations.
    ForbiddenPattern {
        pattern: r"\brm\s+(?:-rf|-fr|-r\s+-f|-f\s+-r)\s+/(?P<target>\S*)",
        unless_target: Some(r"^(?:tmp|var/tmp)"),
        reason: "This would recursively delete system files starting from root directory",
        alternative: "Use \"rm -rf ./target_folder\" to delete specific directories in your workspace",
    },
    ForbiddenPattern {
        pattern: r"\brm\s+(?:-rf|-fr)\s+\*",
        unless_target: None,
        reason: "This would delete all files in the current directory and subdirectories",
        alternative: "Specify exact files or folders to delete, e.g. \"rm -rf build/\" or \"rm temp_file.txt\"",
    },
    ForbiddenPattern {
        pattern: r"\bdd\s+if=",
        unless_target: None,
        reason: "The dd command can overwrite entire disks and cause permanent data loss",
        alternative: "Use standard file copy commands like \"cp\" for file operations",
    },
    ForbiddenPattern {
        pattern: r"\bmkfs\.",
        unless_target: None,
        reason: "This formats filesystems and will erase all data on the target device",
        alternative: "Filesystem formatting should be done manually with extreme caution",
    },
    ForbiddenPattern {
        pattern: r"\bformat\s+",
        unless_target: None,
        reason: "This formats drives and will erase all data",
        alternative: "Formatting should be done manually outside of automated tools",
    },
    // Privilege escalation.
    ForbiddenPattern {
        pattern: r"\bsudo\b",
        unless_target: None,
        reason: "Running commands with sudo grants root privileges and can compromise system security",
        alternative: "Run the agent without sudo, or execute privileged commands manually",
    },
    ForbiddenPattern {
        pattern: r"\bsu\s+",
        unless_target: None,
        reason: "Switching users can grant elevated privileges",
        alternative: "Execute user-switching commands manually when needed",
    },
    ForbiddenPattern {
        pattern: r"\bchmod\s+(?:-R\s+)?777\b",
        unless_target: None,
        reason: "chmod 777 makes files world-writable, creating serious security vulnerabilities",
        alternative: "Use proper permissions like \"chmod 755\" for executables or \"chmod 644\" for files",
    },
    ForbiddenPattern {
        pattern: r"\bsetuid\b",
        unless_target: None,
        reason: "Setting SUID bits can create privilege escalation vulnerabilities",
        alternative: "SUID modifications should be done manually with full understanding of security implications",
    },
    // Remote code piped into a shell.
    ForbiddenPattern {
        pattern: r"\b(?:curl|wget)\s+.*\|\s*(?:bash|sh|zsh|fish)\b",
        unless_target: None,
        reason: "Piping downloaded content directly to a shell interpreter can execute malicious code",
        alternative: "Download the script first, review it, then execute: \"curl url -o script.sh && bash script.sh\"",
    },
    ForbiddenPattern {
        pattern: r"\bwget\s+(?:.*\s)?(?:-O-|--output-document=-)",
        unless_target: None,
        reason: "wget -O- outputs to stdout, often used to pipe to shell interpreters",
        alternative: "Download the file first: \"wget -O script.sh url\", review it, then execute if safe",
    },
    // Kernel and system manipulation.
    ForbiddenPattern {
        pattern: r"\bsysctl\s+",
        unless_target: None,
        reason: "sysctl modifies kernel parameters and can destabilize the system",
        alternative: "Kernel parameter changes should be made manually with proper understanding",
    },
    ForbiddenPattern {
        pattern: r"\biptables\s+",
        unless_target: None,
        reason: "Modifying firewall rules can expose your system to network attacks",
        alternative: "Firewall configuration should be done manually with careful planning",
    },
    ForbiddenPattern {
        pattern: r"\breboot\b",
        unless_target: None,
        reason: "Rebooting would interrupt all running processes and the agent session",
        alternative: "Reboot manually when ready, outside of the agent session",
    },
    ForbiddenPattern {
        pattern: r"\bshutdown\b",
        unless_target: None,
        reason: "Shutting down would terminate all processes",
        alternative: "Shutdown manually when ready",
    },
    ForbiddenPattern {
        pattern: r"\binit\s+[016]\b",
        unless_target: None,
        reason: "Changing init runlevels can halt or reboot the system",
        alternative: "System state changes should be done manually",
    },
    ForbiddenPattern {
        pattern: r"\bmodprobe\s+",
        unless_target: None,
        reason: "Loading kernel modules requires root access and can compromise system security",
        alternative: "Kernel module management should be done manually with proper understanding",
    },
    ForbiddenPattern {
        pattern: r"\binsmod\s+",
        unless_target: None,
        reason: "Inserting kernel modules can compromise system stability and security",
        alternative: "Use modprobe manually if you need to load kernel modules",
    },
    ForbiddenPattern {
        pattern: r"\brmmod\s+",
        unless_target: None,
        reason: "Removing kernel modules can crash the system",
        alternative: "Kernel module management should be done manually",
    },
];

/// A protected directory prefix (lower-case, `/`-separated) for write operations.
#[derive(Debug, Clone, Copy)]
pub struct ProtectedDir {
    pub prefix: &'static str,
    pub reason: &'static str,
}

const PROTECTED_DIRS: &[ProtectedDir] = &[
    // Linux / Unix
    ProtectedDir { prefix: "/etc/", reason: "System configuration directory - modifications can break your system" },
    ProtectedDir { prefix: "/sys/", reason: "Kernel/device interface - should not be modified" },
    ProtectedDir { prefix: "/proc/", reason: "Process information pseudo-filesystem - read-only by design" },
    ProtectedDir { prefix: "/boot/", reason: "Boot loader files - modifications can prevent system boot" },
    ProtectedDir { prefix: "/dev/", reason: "Device files - direct access can damage hardware or data" },
    ProtectedDir { prefix: "/root/", reason: "Root user's home directory - should not be accessed" },
    ProtectedDir { prefix: "/var/log/", reason: "System logs - should not be modified to preserve audit trail" },
    ProtectedDir { prefix: "/usr/bin/", reason: "System binaries - modifications can break system commands" },
    ProtectedDir { prefix: "/usr/sbin/", reason: "System administration binaries - critical system files" },
    ProtectedDir { prefix: "/bin/", reason: "Essential command binaries - system will break if modified" },
    ProtectedDir { prefix: "/sbin/", reason: "System binaries - critical for system operation" },
    // macOS
    ProtectedDir { prefix: "/library/system", reason: "macOS system directory - protected by System Integrity Protection" },
    ProtectedDir { prefix: "/system/", reason: "macOS system files - modifications can break macOS" },
    ProtectedDir { prefix: "/private/etc/", reason: "macOS system configuration - modifications can break system" },
    ProtectedDir { prefix: "/private/var/", reason: "macOS system variable data - should not be modified" },
    // Windows
    ProtectedDir { prefix: "c:/windows/", reason: "Windows system directory - modifications can break Windows" },
    ProtectedDir { prefix: "c:/program files/", reason: "Installed programs - should be modified through installers" },
    ProtectedDir { prefix: "c:/program files (x86)/", reason: "Installed 32-bit programs - use proper installers" },
    ProtectedDir { prefix: "c:/programdata/", reason: "Shared application data - should not be directly modified" },
];

struct CompiledPattern {
    regex: Regex,
    unless_target: Option<Regex>,
    source: &'static ForbiddenPattern,
}

static ALLOWLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ALLOWED_COMMAND_PATTERNS
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("allowlist pattern should compile"))
        .collect()
});

static FORBIDDEN: LazyLock<Vec<CompiledPattern>> = LazyLock::new(|| {
    FORBIDDEN_COMMANDS
        .iter()
        .map(|source| CompiledPattern {
            regex: Regex::new(&format!("(?i){}", source.pattern))
                .expect("forbidden pattern should compile"),
            unless_target: source
                .unless_target
                .map(|p| Regex::new(p).expect("exemption pattern should compile")),
            source,
        })
        .collect()
});

/// Sequencing operators and line breaks; a shell runs each line as its own command.
static SEGMENT_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&&|\|\||;|&|\r\n|\n|\r").expect("separator pattern should compile")
});

/// Kind of filesystem access being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOperation {
    Read,
    Write,
}

/// Why a command or path was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Command {
        reason: &'static str,
        alternative: &'static str,
        chained: bool,
        override_enabled: bool,
    },
    ProtectedPath {
        path: PathBuf,
        reason: &'static str,
        override_enabled: bool,
    },
    OutsideWorkspace {
        path: PathBuf,
        cwd: PathBuf,
        home: PathBuf,
    },
    InvalidPath {
        path: String,
        reason: &'static str,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Command {
                reason,
                alternative,
                chained,
                override_enabled,
            } => {
                if *chained {
                    writeln!(f, "BLOCKED: Chained command contains dangerous operation.")?;
                    writeln!(f, "Issue: {reason}")?;
                } else {
                    writeln!(f, "BLOCKED: {reason}")?;
                }
                write!(f, "Suggestion: {alternative}")?;
                if *override_enabled {
                    write!(f, "{OVERRIDE_NOTE}")?;
                }
                Ok(())
            }
            Rejection::ProtectedPath {
                path,
                reason,
                override_enabled,
            } => {
                writeln!(f, "BLOCKED: Cannot write to system directory.")?;
                writeln!(f, "Path: {}", path.display())?;
                writeln!(f, "Reason: {reason}")?;
                write!(
                    f,
                    "Suggestion: Work within your project directory or home folder"
                )?;
                if *override_enabled {
                    write!(f, "{OVERRIDE_NOTE}")?;
                }
                Ok(())
            }
            Rejection::OutsideWorkspace { path, cwd, home } => {
                writeln!(f, "BLOCKED: Path outside safe workspace.")?;
                writeln!(f, "Path: {}", path.display())?;
                writeln!(
                    f,
                    "Reason: Write operations should be contained within your project or home directory"
                )?;
                write!(
                    f,
                    "Suggestion: Use paths within {} or {}",
                    cwd.display(),
                    home.display()
                )
            }
            Rejection::InvalidPath { path, reason } => {
                write!(f, "BLOCKED: Invalid path {path:?}: {reason}")
            }
        }
    }
}

const OVERRIDE_NOTE: &str = "\nNote: forbidden-action override is enabled for this session, \
but the agent never runs forbidden actions itself; run it manually if you really need it.";

/// Validator verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Forbidden(Rejection),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Directories that anchor write-path containment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContext {
    pub cwd: PathBuf,
    pub home: PathBuf,
    pub temp_dirs: Vec<PathBuf>,
}

impl PathContext {
    /// Context rooted at `cwd`, with the user's home and platform temp directories.
    pub fn for_root(cwd: impl Into<PathBuf>) -> Self {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/nonexistent-home"));
        let mut temp_dirs = vec![PathBuf::from("/tmp"), PathBuf::from("/var/tmp")];
        let system_temp = std::env::temp_dir();
        if !temp_dirs.contains(&system_temp) {
            temp_dirs.push(system_temp);
        }
        Self {
            cwd: cwd.into(),
            home,
            temp_dirs,
        }
    }

    /// Resolve `path` to an absolute, lexically normalized path.
    ///
    /// `~` expands to `home`; relative paths join `cwd`; `.` and `..` fold
    /// without touching the filesystem.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = if path == "~" {
            self.home.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            self.home.join(rest)
        } else {
            PathBuf::from(path)
        };
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        };
        normalize_lexically(&joined)
    }

    /// Whether `resolved` lies under an anchor, comparing against each anchor
    /// both as written and after `follow_links`.
    fn is_contained(&self, resolved: &Path, follow_links: &impl Fn(&Path) -> PathBuf) -> bool {
        let under = |anchor: &Path| {
            resolved.starts_with(anchor) || resolved.starts_with(follow_links(anchor))
        };
        under(self.cwd.as_path())
            || under(self.home.as_path())
            || self.temp_dirs.iter().any(|dir| under(dir.as_path()))
    }
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_allowlisted(segment: &str) -> bool {
    let trimmed = segment.trim();
    // A substitution runs an arbitrary nested command.
    if trimmed.contains("$(") || trimmed.contains('`') {
        return false;
    }
    ALLOWLIST.iter().any(|re| re.is_match(trimmed))
}

fn forbidden_match(segment: &str) -> Option<&'static ForbiddenPattern> {
    FORBIDDEN.iter().find_map(|compiled| {
        let caps = compiled.regex.captures(segment)?;
        if let (Some(exempt), Some(target)) = (&compiled.unless_target, caps.name("target")) {
            if exempt.is_match(target.as_str()) {
                return None;
            }
        }
        Some(compiled.source)
    })
}

/// Split a command on sequencing/conditional separators and line breaks
/// (never on a single pipe).
pub fn command_segments(command: &str) -> Vec<&str> {
    SEGMENT_SEPARATOR
        .split(command)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Classify a shell command.
///
/// Each segment is checked on its own: an allowlisted segment passes, any
/// other segment is tested against the forbidden catalog. A single-segment
/// command is therefore "allowlist first, then catalog", and a dangerous
/// command cannot hide behind a benign first segment.
pub fn validate_command(command: &str, override_enabled: bool) -> Verdict {
    if command.trim().is_empty() {
        return Verdict::Allowed;
    }
    let segments = command_segments(command);
    let chained = segments.len() > 1;
    for segment in segments {
        if is_allowlisted(segment) {
            continue;
        }
        if let Some(pattern) = forbidden_match(segment) {
            return Verdict::Forbidden(Rejection::Command {
                reason: pattern.reason,
                alternative: pattern.alternative,
                chained,
                override_enabled,
            });
        }
    }
    Verdict::Allowed
}

/// Classify a filesystem path for `operation` using lexical resolution only.
///
/// Reads are always allowed. Writes must avoid the protected catalog and
/// stay inside `cwd`, `home` or a temp directory.
pub fn validate_path(
    path: &str,
    operation: PathOperation,
    override_enabled: bool,
    ctx: &PathContext,
) -> Verdict {
    validate_path_with(path, operation, override_enabled, ctx, Path::to_path_buf)
}

/// Like [`validate_path`], but the lexically resolved path is also passed
/// through `follow_links`, which maps it to where a write would really land.
///
/// A write is refused when either form hits the protected catalog, and the
/// followed form must stay inside the anchors.
pub fn validate_path_with(
    path: &str,
    operation: PathOperation,
    override_enabled: bool,
    ctx: &PathContext,
    follow_links: impl Fn(&Path) -> PathBuf,
) -> Verdict {
    if operation == PathOperation::Read || path.trim().is_empty() {
        return Verdict::Allowed;
    }
    if path.contains('\0') {
        return Verdict::Forbidden(Rejection::InvalidPath {
            path: path.replace('\0', "\\0"),
            reason: "path contains a NUL byte",
        });
    }

    let lexical = ctx.resolve(path.trim());
    let resolved = follow_links(&lexical);
    if let Some(dir) = protected_dir(&lexical).or_else(|| protected_dir(&resolved)) {
        return Verdict::Forbidden(Rejection::ProtectedPath {
            path: resolved,
            reason: dir.reason,
            override_enabled,
        });
    }

    if !ctx.is_contained(&resolved, &follow_links) {
        return Verdict::Forbidden(Rejection::OutsideWorkspace {
            path: resolved,
            cwd: ctx.cwd.clone(),
            home: ctx.home.clone(),
        });
    }
    Verdict::Allowed
}

fn protected_dir(path: &Path) -> Option<&'static ProtectedDir> {
    let comparable = comparable_form(path);
    PROTECTED_DIRS
        .iter()
        .find(|dir| comparable.starts_with(dir.prefix))
}

/// Lower-case, `/`-separated form with a trailing slash, so `/etc` matches `/etc/`.
fn comparable_form(path: &Path) -> String {
    let mut text = path.to_string_lossy().replace('\\', "/").to_lowercase();
    if let Some(rest) = text.strip_prefix("//?/") {
        text = rest.to_string();
    }
    if !text.ends_with('/') {
        text.push('/');
    }
    text
}
