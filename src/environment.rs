//! Construction de l'environnement de chaque exécutable lancé.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{Platform, ResolvedConfiguration};
use crate::utils::path::{prepend_search_path, FileSystem};

/// Identifiant d'affichage partagé par le lanceur Xvfb et la commande enveloppée.
pub const VIRTUAL_DISPLAY: &str = ":99";
/// Fichier X-authority utilisable sur un système de fichiers en lecture seule.
pub const SERVERLESS_XAUTHORITY: &str = "/tmp/.Xauthority";
/// Cache fontconfig inscriptible en serverless.
pub const SERVERLESS_FONT_CACHE: &str = "/tmp/fontconfig-cache";

/// Sous-dossiers d'un build, dérivés de sa racine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildLayout {
    pub library_dir: PathBuf,
    pub fonts_dir: PathBuf,
    pub fonts_config: PathBuf,
    pub extension_dir: PathBuf,
    pub extension_library_dir: PathBuf,
    pub keyboard_dir: PathBuf,
    pub bundled_launcher: PathBuf,
}

impl BuildLayout {
    pub fn new(binary_root: &Path) -> Self {
        let extension_dir = binary_root.join("xvfb");
        Self {
            library_dir: binary_root.join("lib"),
            fonts_dir: binary_root.join("fonts"),
            fonts_config: binary_root.join("fonts").join("fonts.conf"),
            extension_library_dir: extension_dir.join("lib"),
            keyboard_dir: extension_dir.join("share").join("X11").join("xkb"),
            bundled_launcher: extension_dir.join("bin").join("xvfb-run"),
            extension_dir,
        }
    }
}

/// Construit l'environnement complet d'un exécutable poppler.
///
/// Part d'une copie de l'environnement hôte; les chemins de bibliothèques
/// sont préfixés, jamais remplacés; les surcharges de configuration sont
/// appliquées en dernier et gagnent toujours.
pub fn build(
    binary_root: &Path,
    config: &ResolvedConfiguration,
    fs: &dyn FileSystem,
) -> BTreeMap<String, String> {
    let mut env = config.host_env.clone();
    let layout = BuildLayout::new(binary_root);
    let platform = config.platform;
    let library_var = platform.library_path_var();

    if fs.is_dir(&layout.library_dir) {
        prepend(&mut env, platform, library_var, &layout.library_dir);
    }

    // Sans polices, le texte des formulaires est rendu invisible.
    if fs.exists(&layout.fonts_config) {
        env.insert(
            "FONTCONFIG_PATH".to_string(),
            layout.fonts_dir.to_string_lossy().to_string(),
        );
        env.insert(
            "FONTCONFIG_FILE".to_string(),
            layout.fonts_config.to_string_lossy().to_string(),
        );
        if config.context.is_serverless {
            env.insert("XDG_CACHE_HOME".to_string(), SERVERLESS_FONT_CACHE.to_string());
        } else if !env.contains_key("XDG_CACHE_HOME") {
            env.insert(
                "XDG_CACHE_HOME".to_string(),
                std::env::temp_dir()
                    .join("poppler-fontconfig")
                    .to_string_lossy()
                    .to_string(),
            );
        }
    }

    if config.context.is_serverless {
        env.insert("DISPLAY".to_string(), VIRTUAL_DISPLAY.to_string());
        env.insert("XAUTHORITY".to_string(), SERVERLESS_XAUTHORITY.to_string());
        if fs.is_dir(&layout.extension_dir) {
            prepend(&mut env, platform, library_var, &layout.extension_library_dir);
        }
        // Supprime les avertissements xkbcomp au démarrage de Xvfb.
        if fs.is_dir(&layout.keyboard_dir) {
            env.insert(
                "XKB_CONFIG_ROOT".to_string(),
                layout.keyboard_dir.to_string_lossy().to_string(),
            );
        }
    }

    for (key, value) in &config.env_overrides {
        let key = existing_key(&env, platform, key);
        env.insert(key, value.clone());
    }

    env
}

fn prepend(env: &mut BTreeMap<String, String>, platform: Platform, key: &str, entry: &Path) {
    let key = existing_key(env, platform, key);
    let value = prepend_search_path(
        env.get(&key).map(String::as_str),
        entry,
        platform.path_separator(),
    );
    env.insert(key, value);
}

/// Nom de variable à écrire. Sous Windows les noms ignorent la casse
/// (`Path` et `PATH` désignent la même variable): la clé déjà présente est réutilisée.
fn existing_key(env: &BTreeMap<String, String>, platform: Platform, key: &str) -> String {
    if platform == Platform::Windows {
        if let Some(existing) = env.keys().find(|name| name.eq_ignore_ascii_case(key)) {
            return existing.clone();
        }
    }
    key.to_string()
}
