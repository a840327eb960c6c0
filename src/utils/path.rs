use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Accès en lecture au système de fichiers, injectable pour les tests.
pub trait FileSystem: Send + Sync {
    /// Indique si le chemin existe (fichier ou dossier).
    fn exists(&self, path: &Path) -> bool;

    /// Indique si le chemin est un dossier existant.
    fn is_dir(&self, path: &Path) -> bool;

    /// Liste les noms des entrées directes d'un dossier.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Lit un fichier texte complet.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Implémentation adossée au système de fichiers de l'hôte.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostFileSystem;

impl FileSystem for HostFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Retourne le premier candidat accepté par `exists`, dans l'ordre de la liste.
///
/// Toutes les chaînes de repli (versions, dossiers legacy, lanceurs) passent
/// par ce helper, ce qui permet de tester l'ordre de priorité sans disque.
pub fn first_existing<T, F>(candidates: impl IntoIterator<Item = T>, mut exists: F) -> Option<T>
where
    F: FnMut(&T) -> bool,
{
    candidates.into_iter().find(|candidate| exists(candidate))
}

/// Supprime les chemins dupliques en conservant l'ordre.
pub fn dedupe_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut deduped = Vec::new();
    for path in paths {
        let key = path.to_string_lossy().to_string();
        if seen.insert(key) {
            deduped.push(path);
        }
    }
    deduped
}

/// Préfixe une variable de type liste de chemins sans écraser sa valeur.
pub fn prepend_search_path(current: Option<&str>, entry: &Path, separator: char) -> String {
    let entry = entry.to_string_lossy();
    match current {
        Some(existing) if !existing.is_empty() => format!("{entry}{separator}{existing}"),
        _ => entry.to_string(),
    }
}
