#[cfg(unix)]
use std::fs;
use std::path::{Path, PathBuf};

/// Dossiers dont les fichiers doivent être exécutables après résolution.
pub fn executable_dirs(directory: &Path, binary_root: &Path) -> Vec<PathBuf> {
    vec![
        directory.to_path_buf(),
        binary_root.join("xvfb").join("bin"),
    ]
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Ok(false);
    }
    let mut permissions = metadata.permissions();
    let mode = permissions.mode();

    if mode & 0o111 == 0 {
        permissions.set_mode(mode | 0o755);
        fs::set_permissions(path, permissions)?;
        return Ok(true);
    }

    Ok(false)
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> std::io::Result<bool> {
    Ok(false)
}

/// Rend exécutables tous les fichiers des dossiers donnés.
///
/// L'extraction d'archive ne conserve pas toujours le bit d'exécution. Les
/// échecs sont journalisés puis ignorés: l'étape ne fait jamais échouer un appel.
/// Retourne le nombre de fichiers modifiés.
pub fn mark_executable(dirs: &[PathBuf]) -> usize {
    let mut changed = 0;
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::debug!("[poppler][permissions] skip {}: {}", dir.display(), err);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match ensure_executable(&path) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(err) => {
                    log::debug!(
                        "[poppler][permissions] failed to adjust permissions on {}: {}",
                        path.display(),
                        err
                    );
                }
            }
        }
    }
    changed
}

/// Lance `mark_executable` en arrière-plan, sans jamais bloquer ni échouer.
///
/// Utilise une tâche bloquante tokio si un runtime est actif, un thread
/// détaché sinon.
pub fn spawn_mark_executable(dirs: Vec<PathBuf>) {
    let job = move || {
        let changed = mark_executable(&dirs);
        if changed > 0 {
            log::debug!("[poppler][permissions] marked {changed} file(s) executable");
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn_blocking(job));
        }
        Err(_) => {
            if let Err(err) = std::thread::Builder::new()
                .name("poppler-permissions".to_string())
                .spawn(job)
            {
                log::debug!("[poppler][permissions] unable to start worker: {err}");
            }
        }
    }
}
