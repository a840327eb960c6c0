//! Enveloppe une commande dans un lanceur d'affichage virtuel (`xvfb-run`)
//! quand aucun affichage n'est attaché.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ResolvedConfiguration;
use crate::context::has_test_runner_marker;
use crate::environment::{BuildLayout, SERVERLESS_XAUTHORITY, VIRTUAL_DISPLAY};
use crate::process::PreparedCommand;
use crate::utils::path::{first_existing, FileSystem};

/// Numéro de serveur imposé au lanceur, cohérent avec `DISPLAY=:99`.
const SERVER_NUM_ARG: &str = "--server-num=99";
/// Géométrie d'écran passée aux lanceurs système.
const SYSTEM_SERVER_ARGS: &str = "--server-args=-screen 0 1280x1024x24";
const SHELL: &str = "sh";

/// Origine d'un lanceur candidat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// Script livré avec la distribution, sans garantie de bit d'exécution.
    Bundled,
    /// Script installé sur l'hôte.
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LauncherCandidate {
    pub path: PathBuf,
    pub kind: LauncherKind,
}

/// Manière dont la commande finale est lancée.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Aucun affichage virtuel nécessaire.
    Direct,
    /// Script aux fins de ligne CRLF, normalisé en mémoire et évalué par `sh -c`.
    NormalizedScript(PathBuf),
    /// Script embarqué, lancé via `sh`.
    BundledScript(PathBuf),
    /// Script système lancé directement.
    SystemScript(PathBuf),
    /// Aucun lanceur trouvé: variables d'affichage seules, au mieux.
    Unwrapped,
}

/// Liste ordonnée des lanceurs: embarqué d'abord, puis deux emplacements système.
pub fn launcher_candidates(binary_root: &Path) -> Vec<LauncherCandidate> {
    vec![
        LauncherCandidate {
            path: BuildLayout::new(binary_root).bundled_launcher,
            kind: LauncherKind::Bundled,
        },
        LauncherCandidate {
            path: PathBuf::from("/usr/bin/xvfb-run"),
            kind: LauncherKind::System,
        },
        LauncherCandidate {
            path: PathBuf::from("/usr/local/bin/xvfb-run"),
            kind: LauncherKind::System,
        },
    ]
}

/// Indique si la commande doit tourner sous un affichage virtuel.
pub fn needs_virtual_display(config: &ResolvedConfiguration) -> bool {
    let context = &config.context;
    let unattended = context.is_serverless
        || context.is_ci
        || has_test_runner_marker(&config.host_env);
    config.display_override != Some(false)
        && !context.has_display
        && unattended
        && config.platform.supports_virtual_display()
}

/// Retourne le premier lanceur présent.
pub fn find_launcher<'a>(
    candidates: &'a [LauncherCandidate],
    fs: &dyn FileSystem,
) -> Option<&'a LauncherCandidate> {
    first_existing(candidates.iter(), |candidate| fs.exists(&candidate.path))
}

/// Retourne la commande réellement lancée et le mode retenu.
///
/// L'absence de lanceur n'est jamais une erreur: la commande part sans
/// enveloppe avec `DISPLAY`/`XAUTHORITY` positionnés.
pub fn wrap(
    command: PreparedCommand,
    needs_display: bool,
    candidates: &[LauncherCandidate],
    fs: &dyn FileSystem,
) -> (PreparedCommand, DisplayMode) {
    if !needs_display {
        return (command, DisplayMode::Direct);
    }

    let PreparedCommand {
        name,
        program,
        args,
        mut env,
    } = command;
    env.insert("DISPLAY".to_string(), VIRTUAL_DISPLAY.to_string());

    let Some(launcher) = find_launcher(candidates, fs) else {
        log::warn!(
            "[poppler][display] no xvfb-run launcher found, running {} without a virtual display",
            program.to_string_lossy()
        );
        env.insert("XAUTHORITY".to_string(), SERVERLESS_XAUTHORITY.to_string());
        return (
            PreparedCommand {
                name,
                program,
                args,
                env,
            },
            DisplayMode::Unwrapped,
        );
    };

    let mut target = vec![program.into_os_string()];
    target.extend(args);

    if let Some(normalized) = normalized_script(&launcher.path, fs) {
        log::debug!(
            "[poppler][display] {} has CRLF line endings, evaluating normalized text",
            launcher.path.display()
        );
        let mut args: Vec<OsString> = vec![
            "-c".into(),
            normalized.into(),
            "xvfb-run".into(),
            SERVER_NUM_ARG.into(),
        ];
        args.extend(target);
        return (
            PreparedCommand {
                name,
                program: PathBuf::from(SHELL),
                args,
                env,
            },
            DisplayMode::NormalizedScript(launcher.path.clone()),
        );
    }

    match launcher.kind {
        LauncherKind::Bundled => {
            let mut args: Vec<OsString> =
                vec![launcher.path.clone().into_os_string(), SERVER_NUM_ARG.into()];
            args.extend(target);
            (
                PreparedCommand {
                    name,
                    program: PathBuf::from(SHELL),
                    args,
                    env,
                },
                DisplayMode::BundledScript(launcher.path.clone()),
            )
        }
        LauncherKind::System => {
            let mut args: Vec<OsString> = vec![SERVER_NUM_ARG.into(), SYSTEM_SERVER_ARGS.into()];
            args.extend(target);
            (
                PreparedCommand {
                    name,
                    program: launcher.path.clone(),
                    args,
                    env,
                },
                DisplayMode::SystemScript(launcher.path.clone()),
            )
        }
    }
}

/// Retourne le texte normalisé (LF) si le script utilise des fins de ligne CRLF.
fn normalized_script(path: &Path, fs: &dyn FileSystem) -> Option<String> {
    let text = fs.read_to_string(path).ok()?;
    if text.contains("\r\n") {
        Some(text.replace("\r\n", "\n"))
    } else {
        None
    }
}
