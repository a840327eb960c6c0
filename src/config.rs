//! Configuration d'une instance: options explicites, variables d'environnement
//! et contexte d'exécution, figés dans une `ResolvedConfiguration`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::context::{parse_flag, EnvMap, RuntimeContext};
use crate::error::{Error, Result};
use crate::utils::path::{dedupe_paths, first_existing, FileSystem};

/// Version de poppler imposée (`24.08`).
pub const ENV_VERSION: &str = "POPPLER_VERSION";
/// Préférence explicite pour les builds embarquant Xvfb.
pub const ENV_PREFER_XVFB: &str = "POPPLER_PREFER_XVFB";
/// Dossier d'exécutables imposé.
pub const ENV_BINARY_PATH: &str = "POPPLER_BINARY_PATH";
/// Nom de paquet de distribution imposé.
pub const ENV_PACKAGE: &str = "POPPLER_PACKAGE";
/// Racine de distribution imposée.
pub const ENV_DISTRIBUTION_ROOT: &str = "POPPLER_DISTRIBUTION_ROOT";

/// Plateforme hôte prise en charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Retourne la plateforme courante ou une erreur de configuration.
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::MacOs),
            "windows" | "win32" => Ok(Self::Windows),
            other => Err(Error::Configuration(format!(
                "unsupported platform '{other}': no poppler distribution is available"
            ))),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "darwin",
            Self::Windows => "win32",
        }
    }

    /// Paquets de distribution par défaut, dans l'ordre de préférence.
    ///
    /// La variante avec polices vient d'abord: sans polices, le texte des
    /// formulaires est rendu invisible sans erreur.
    pub fn default_packages(&self) -> &'static [&'static str] {
        match self {
            Self::Linux => &["poppler-linux-fonts", "poppler-linux"],
            Self::MacOs => &["poppler-darwin"],
            Self::Windows => &["poppler-win32"],
        }
    }

    /// Variable de recherche des bibliothèques dynamiques.
    pub fn library_path_var(&self) -> &'static str {
        match self {
            Self::Linux => "LD_LIBRARY_PATH",
            Self::MacOs => "DYLD_LIBRARY_PATH",
            Self::Windows => "PATH",
        }
    }

    pub fn path_separator(&self) -> char {
        match self {
            Self::Windows => ';',
            _ => ':',
        }
    }

    /// Seul Linux sait démarrer un affichage virtuel Xvfb.
    pub fn supports_virtual_display(&self) -> bool {
        matches!(self, Self::Linux)
    }

    pub fn exe_name(&self, base: &str) -> String {
        match self {
            Self::Windows if !base.ends_with(".exe") => format!("{base}.exe"),
            _ => base.to_string(),
        }
    }
}

/// Encodage utilisé pour décoder les sorties texte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl OutputEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).to_string(),
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Taille de sortie maximale par défaut (poppler peut produire de gros rendus).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024 * 1024;

/// Options d'exécution appliquées à chaque process lancé.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionOptions {
    pub encoding: OutputEncoding,
    pub max_output_bytes: usize,
    pub timeout: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            encoding: OutputEncoding::Utf8,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: None,
        }
    }
}

/// Options explicites fournies par l'appelant; elles priment sur l'environnement.
#[derive(Clone, Debug, Default)]
pub struct PopplerOptions {
    pub distribution_root: Option<PathBuf>,
    pub binary_path: Option<PathBuf>,
    pub package: Option<String>,
    pub version: Option<String>,
    pub prefer_virtual_display: Option<bool>,
    pub env_overrides: BTreeMap<String, String>,
    pub execution: ExecutionOptions,
}

impl PopplerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distribution_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.distribution_root = Some(root.into());
        self
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn prefer_virtual_display(mut self, prefer: bool) -> Self {
        self.prefer_virtual_display = Some(prefer);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.execution.timeout = Some(timeout);
        self
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.execution.max_output_bytes = limit;
        self
    }

    pub fn encoding(mut self, encoding: OutputEncoding) -> Self {
        self.execution.encoding = encoding;
        self
    }
}

/// Configuration figée d'une instance. Jamais modifiée après construction.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedConfiguration {
    pub platform: Platform,
    pub context: RuntimeContext,
    /// Préférence explicite (options ou `POPPLER_PREFER_XVFB`), si fournie.
    pub display_override: Option<bool>,
    /// Préférence effective pour les variantes embarquant un affichage virtuel.
    pub prefer_virtual_display: bool,
    pub distribution_root: PathBuf,
    pub binary_path: Option<PathBuf>,
    pub package: Option<String>,
    pub version: Option<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub execution: ExecutionOptions,
    #[serde(skip)]
    pub host_env: EnvMap,
}

impl ResolvedConfiguration {
    /// Fige la configuration à partir des options, de l'environnement et de la plateforme.
    pub fn build(
        options: PopplerOptions,
        host_env: EnvMap,
        platform: Platform,
        fs: &dyn FileSystem,
    ) -> Result<Self> {
        let context = RuntimeContext::detect(&host_env);

        let display_override = match options.prefer_virtual_display {
            Some(prefer) => Some(prefer),
            None => match non_empty_var(&host_env, ENV_PREFER_XVFB) {
                Some(raw) => Some(parse_flag(&raw).ok_or_else(|| {
                    Error::Configuration(format!(
                        "{ENV_PREFER_XVFB} must be true or false, got '{raw}'"
                    ))
                })?),
                None => None,
            },
        };
        let prefer_virtual_display =
            display_override.unwrap_or(context.is_serverless || context.is_ci);

        let binary_path = options
            .binary_path
            .or_else(|| non_empty_var(&host_env, ENV_BINARY_PATH).map(PathBuf::from));
        let package = options
            .package
            .or_else(|| non_empty_var(&host_env, ENV_PACKAGE));
        let version = options
            .version
            .or_else(|| non_empty_var(&host_env, ENV_VERSION))
            .map(|v| v.trim().to_string());

        let distribution_root = match options.distribution_root {
            Some(root) => root,
            None => default_distribution_root(&host_env, fs),
        };

        Ok(Self {
            platform,
            context,
            display_override,
            prefer_virtual_display,
            distribution_root,
            binary_path,
            package,
            version,
            env_overrides: options.env_overrides,
            execution: options.execution,
            host_env,
        })
    }
}

fn non_empty_var(env: &EnvMap, key: &str) -> Option<String> {
    env.get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Retourne la liste ordonnee des racines de distribution candidates.
fn distribution_root_candidates(env: &EnvMap) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(root) = non_empty_var(env, ENV_DISTRIBUTION_ROOT) {
        paths.push(PathBuf::from(root));
    }
    paths.push(Path::new("vendor").join("poppler"));

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.push(dir.join("poppler"));
            paths.push(dir.join("resources").join("poppler"));
        }
    }

    // Couche serverless montée sous /opt.
    paths.push(Path::new("/opt").join("poppler"));

    dedupe_paths(paths)
}

fn default_distribution_root(env: &EnvMap, fs: &dyn FileSystem) -> PathBuf {
    first_existing(distribution_root_candidates(env), |path| fs.is_dir(path))
        .unwrap_or_else(|| Path::new("vendor").join("poppler"))
}
