use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ResolvedConfiguration;
use crate::context::RuntimeContext;

/// Origine d'une tentative de résolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptSource {
    /// Dossier imposé par l'appelant ou `POPPLER_BINARY_PATH`.
    ExplicitPath,
    /// Paquet imposé par l'appelant ou `POPPLER_PACKAGE`.
    ExplicitPackage,
    /// Paquet par défaut de la plateforme.
    DefaultPackage,
    /// Build versionné à l'intérieur d'un paquet.
    VersionedBuild,
    /// Dossier legacy non versionné.
    LegacyDirectory,
}

/// Résultat d'une tentative de résolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Selected,
    Missing,
    Skipped,
}

/// Decrit une tentative de resolution d'un dossier d'executables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolutionAttempt {
    /// Chemin tente.
    pub candidate: PathBuf,
    /// Source de la tentative.
    pub source: AttemptSource,
    /// Resultat de la tentative.
    pub outcome: AttemptOutcome,
    /// Detail eventuel (variante non preferee, version differente...).
    pub detail: Option<String>,
}

impl ResolutionAttempt {
    pub(crate) fn new(candidate: &Path, source: AttemptSource, outcome: AttemptOutcome) -> Self {
        Self {
            candidate: candidate.to_path_buf(),
            source,
            outcome,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Information de debug complete exposee pour diagnostic.
#[derive(Clone, Debug, Serialize)]
pub struct RuntimeReport {
    /// Identifiant de plateforme (`linux`, `darwin`, `win32`).
    pub platform: &'static str,
    pub context: RuntimeContext,
    pub prefer_virtual_display: bool,
    pub needs_virtual_display: bool,
    pub distribution_root: PathBuf,
    /// Dossier d'executables retenu.
    pub executable_directory: PathBuf,
    /// Premier lanceur Xvfb trouve, si l'affichage virtuel est necessaire.
    pub launcher: Option<PathBuf>,
    /// Liste des tentatives effectuees.
    pub attempts: Vec<ResolutionAttempt>,
}

impl RuntimeReport {
    pub(crate) fn new(
        config: &ResolvedConfiguration,
        executable_directory: &Path,
        needs_virtual_display: bool,
        launcher: Option<PathBuf>,
        attempts: Vec<ResolutionAttempt>,
    ) -> Self {
        Self {
            platform: config.platform.id(),
            context: config.context,
            prefer_virtual_display: config.prefer_virtual_display,
            needs_virtual_display,
            distribution_root: config.distribution_root.clone(),
            executable_directory: executable_directory.to_path_buf(),
            launcher,
            attempts,
        }
    }

    /// Sérialise le rapport en JSON indenté.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
