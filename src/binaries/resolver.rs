use std::path::{Path, PathBuf};

use crate::config::{ResolvedConfiguration, ENV_BINARY_PATH, ENV_PACKAGE};
use crate::error::{Error, Result};
use crate::utils::path::{first_existing, FileSystem};

use super::catalog::{self, Version, VersionEntry};
use super::diagnostics::{AttemptOutcome, AttemptSource, ResolutionAttempt};

/// Dossiers legacy non versionnés, variante avec affichage virtuel d'abord.
const LEGACY_DIRS_XVFB_FIRST: [&str; 2] = ["poppler-xvfb", "poppler"];

/// Dossier d'exécutables retenu et historique des tentatives.
#[derive(Clone, Debug)]
pub struct Resolution {
    /// Dossier contenant les exécutables (`.../bin`).
    pub directory: PathBuf,
    /// Racine du build, d'où sont dérivés `lib/`, `fonts/` et `xvfb/`.
    pub binary_root: PathBuf,
    pub attempts: Vec<ResolutionAttempt>,
}

impl Resolution {
    fn from_bin_dir(directory: PathBuf, attempts: Vec<ResolutionAttempt>) -> Self {
        let binary_root = directory
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| directory.clone());
        Self {
            directory,
            binary_root,
            attempts,
        }
    }
}

/// Candidat ordonné d'une chaîne de repli.
struct Candidate {
    bin_dir: PathBuf,
    source: AttemptSource,
    detail: Option<String>,
}

/// Raison pour laquelle un paquet n'a fourni aucun build.
enum PackageMiss {
    /// La version demandée n'y est pas installée; builds trouvés dans le paquet.
    VersionAbsent(Vec<VersionEntry>),
    /// Aucun dossier `bin/` candidat n'existe.
    NoBuild(Vec<PathBuf>),
}

/// Résout le dossier d'exécutables selon l'ordre de priorité fixe:
/// dossier imposé, paquet imposé, puis paquets par défaut de la plateforme.
pub fn resolve(config: &ResolvedConfiguration, fs: &dyn FileSystem) -> Result<Resolution> {
    let mut attempts = Vec::new();

    if let Some(path) = &config.binary_path {
        if fs.is_dir(path) {
            attempts.push(ResolutionAttempt::new(
                path,
                AttemptSource::ExplicitPath,
                AttemptOutcome::Selected,
            ));
            log::debug!("[poppler][resolve] using explicit binary path {}", path.display());
            return Ok(Resolution::from_bin_dir(path.clone(), attempts));
        }
        return Err(Error::Configuration(format!(
            "{ENV_BINARY_PATH} points to '{}', which is not a directory",
            path.display()
        )));
    }

    match &config.package {
        Some(package) => {
            let dir = config.distribution_root.join(package);
            if !fs.is_dir(&dir) {
                return Err(Error::Configuration(format!(
                    "{ENV_PACKAGE} '{}' was not found under {}",
                    package,
                    config.distribution_root.display()
                )));
            }
            attempts.push(ResolutionAttempt::new(
                &dir,
                AttemptSource::ExplicitPackage,
                AttemptOutcome::Selected,
            ));
            match select_in_package(&dir, config, fs, &mut attempts)? {
                Ok(bin_dir) => Ok(Resolution::from_bin_dir(bin_dir, attempts)),
                Err(PackageMiss::VersionAbsent(entries)) => Err(version_absent(config, &entries)),
                Err(PackageMiss::NoBuild(searched)) => Err(Error::ExecutableNotFound {
                    name: format!("poppler executables in {}", dir.display()),
                    searched,
                }),
            }
        }
        None => resolve_default_packages(config, fs, attempts),
    }
}

/// Parcourt les paquets par défaut dans l'ordre; un paquet présent mais sans
/// build utilisable laisse la place au suivant.
fn resolve_default_packages(
    config: &ResolvedConfiguration,
    fs: &dyn FileSystem,
    mut attempts: Vec<ResolutionAttempt>,
) -> Result<Resolution> {
    let packages: Vec<PathBuf> = config
        .platform
        .default_packages()
        .iter()
        .map(|package| config.distribution_root.join(package))
        .collect();

    let mut scanned_entries = Vec::new();
    let mut searched = Vec::new();
    let mut any_package = false;
    let mut only_version_absent = true;

    for package_dir in &packages {
        if !fs.is_dir(package_dir) {
            attempts.push(ResolutionAttempt::new(
                package_dir,
                AttemptSource::DefaultPackage,
                AttemptOutcome::Missing,
            ));
            continue;
        }
        any_package = true;
        let index = attempts.len();
        attempts.push(ResolutionAttempt::new(
            package_dir,
            AttemptSource::DefaultPackage,
            AttemptOutcome::Selected,
        ));

        let miss = match select_in_package(package_dir, config, fs, &mut attempts)? {
            Ok(bin_dir) => return Ok(Resolution::from_bin_dir(bin_dir, attempts)),
            Err(miss) => miss,
        };
        let detail = match miss {
            PackageMiss::VersionAbsent(entries) => {
                scanned_entries.extend(entries);
                "requested version not installed"
            }
            PackageMiss::NoBuild(paths) => {
                only_version_absent = false;
                searched.extend(paths);
                "no usable build"
            }
        };
        log::debug!(
            "[poppler][resolve] {} skipped: {detail}",
            package_dir.display()
        );
        attempts[index].outcome = AttemptOutcome::Skipped;
        attempts[index].detail = Some(detail.to_string());
    }

    if !any_package {
        return Err(Error::ExecutableNotFound {
            name: format!(
                "poppler distribution for {} ({})",
                config.platform.id(),
                config.platform.default_packages().join(", ")
            ),
            searched: packages,
        });
    }
    if only_version_absent {
        return Err(version_absent(config, &scanned_entries));
    }
    Err(Error::ExecutableNotFound {
        name: format!(
            "poppler executables in {}",
            config.distribution_root.display()
        ),
        searched,
    })
}

fn version_absent(config: &ResolvedConfiguration, entries: &[VersionEntry]) -> Error {
    let requested = config.version.as_deref().unwrap_or_default();
    let installed = catalog::installed_versions(entries);
    let installed = if installed.is_empty() {
        "none".to_string()
    } else {
        installed.join(", ")
    };
    Error::Configuration(format!(
        "poppler version {requested} is not installed (installed versions: {installed})"
    ))
}

/// Choisit un build dans un paquet: version demandée, sinon la plus récente
/// dans la variante préférée, sinon la plus récente tout court, sinon legacy.
fn select_in_package(
    package_dir: &Path,
    config: &ResolvedConfiguration,
    fs: &dyn FileSystem,
    attempts: &mut Vec<ResolutionAttempt>,
) -> Result<std::result::Result<PathBuf, PackageMiss>> {
    let prefer = config.prefer_virtual_display;
    let entries = catalog::scan(package_dir, prefer, fs);

    let candidates = match &config.version {
        Some(requested) => {
            let wanted = Version::parse(requested).ok_or_else(|| {
                Error::Configuration(format!(
                    "invalid poppler version '{requested}', expected major.minor (e.g. 24.08)"
                ))
            })?;
            let candidates = requested_version_candidates(&entries, &wanted, prefer);
            if candidates.is_empty() {
                return Ok(Err(PackageMiss::VersionAbsent(entries)));
            }
            candidates
        }
        None if !entries.is_empty() => latest_version_candidates(&entries, prefer),
        None => legacy_candidates(package_dir, prefer),
    };

    let searched: Vec<PathBuf> = candidates.iter().map(|c| c.bin_dir.clone()).collect();
    let selected = first_existing(candidates, |candidate| {
        let exists = fs.is_dir(&candidate.bin_dir);
        let outcome = if exists {
            AttemptOutcome::Selected
        } else {
            AttemptOutcome::Missing
        };
        let mut attempt = ResolutionAttempt::new(&candidate.bin_dir, candidate.source, outcome);
        if let Some(detail) = &candidate.detail {
            attempt = attempt.with_detail(detail.clone());
        }
        attempts.push(attempt);
        exists
    });

    match selected {
        Some(candidate) => {
            log::info!(
                "[poppler][resolve] selected {} (prefer_virtual_display={})",
                candidate.bin_dir.display(),
                prefer
            );
            Ok(Ok(candidate.bin_dir))
        }
        None => Ok(Err(PackageMiss::NoBuild(searched))),
    }
}

fn entry_candidate(entry: &VersionEntry, prefer: bool) -> Candidate {
    let detail = if entry.has_virtual_display_bundle == prefer {
        format!("{} (preferred variant)", entry.version)
    } else {
        format!("{} (fallback variant)", entry.version)
    };
    Candidate {
        bin_dir: entry.directory.join("bin"),
        source: AttemptSource::VersionedBuild,
        detail: Some(detail),
    }
}

/// Version demandée: variante préférée d'abord, l'autre variante est acceptée.
fn requested_version_candidates(entries: &[VersionEntry], wanted: &Version, prefer: bool) -> Vec<Candidate> {
    let mut matching: Vec<&VersionEntry> = entries.iter().filter(|e| &e.version == wanted).collect();
    matching.sort_by_key(|e| e.has_virtual_display_bundle != prefer);
    matching.into_iter().map(|e| entry_candidate(e, prefer)).collect()
}

/// Sans version: d'abord la variante préférée par version décroissante, puis
/// la version la plus haute toutes variantes confondues.
fn latest_version_candidates(entries: &[VersionEntry], prefer: bool) -> Vec<Candidate> {
    let mut ordered: Vec<&VersionEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| b.version.cmp(&a.version));

    let preferred = ordered
        .iter()
        .filter(|e| e.has_virtual_display_bundle == prefer)
        .copied();
    let any = ordered.iter().copied();
    preferred.chain(any).map(|e| entry_candidate(e, prefer)).collect()
}

fn legacy_candidates(package_dir: &Path, prefer: bool) -> Vec<Candidate> {
    let mut names = LEGACY_DIRS_XVFB_FIRST;
    if !prefer {
        names.reverse();
    }
    names
        .iter()
        .map(|name| Candidate {
            bin_dir: package_dir.join(name).join("bin"),
            source: AttemptSource::LegacyDirectory,
            detail: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Platform, PopplerOptions};
    use crate::context::EnvMap;
    use crate::utils::path::fake::FakeFileSystem;

    fn config(options: PopplerOptions, env: &[(&str, &str)]) -> ResolvedConfiguration {
        let env: EnvMap = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResolvedConfiguration::build(
            options.distribution_root("/dist"),
            env,
            Platform::Linux,
            &FakeFileSystem::new(),
        )
        .unwrap()
    }

    fn layout() -> FakeFileSystem {
        FakeFileSystem::new()
            .dir("/dist/poppler-linux-fonts/poppler-24.08/bin")
            .dir("/dist/poppler-linux-fonts/poppler-21.03-xvfb/bin")
            .dir("/dist/poppler-linux/poppler-25.01/bin")
    }

    #[test]
    fn serverless_prefers_xvfb_variant_over_newer_plain_build() {
        let config = config(PopplerOptions::new(), &[("AWS_LAMBDA_FUNCTION_NAME", "f")]);
        let resolution = resolve(&config, &layout()).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-21.03-xvfb/bin")
        );
        assert_eq!(
            resolution.binary_root,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-21.03-xvfb")
        );
    }

    #[test]
    fn workstation_takes_highest_plain_build() {
        let config = config(PopplerOptions::new(), &[]);
        let resolution = resolve(&config, &layout()).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-24.08/bin")
        );
    }

    #[test]
    fn falls_back_to_highest_version_when_preferred_variant_is_absent() {
        let fs = FakeFileSystem::new()
            .dir("/dist/poppler-linux-fonts/poppler-22.02/bin")
            .dir("/dist/poppler-linux-fonts/poppler-24.08/bin");
        let config = config(PopplerOptions::new().prefer_virtual_display(true), &[]);
        let resolution = resolve(&config, &fs).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-24.08/bin")
        );
    }

    #[test]
    fn requested_version_accepts_other_variant() {
        let config = config(PopplerOptions::new().version("24.08").prefer_virtual_display(true), &[]);
        let resolution = resolve(&config, &layout()).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-24.08/bin")
        );
    }

    #[test]
    fn requested_version_prefers_matching_variant() {
        let fs = layout().dir("/dist/poppler-linux-fonts/poppler-24.08-xvfb/bin");
        let config = config(PopplerOptions::new().version("24.08").prefer_virtual_display(true), &[]);
        let resolution = resolve(&config, &fs).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-24.08-xvfb/bin")
        );
    }

    #[test]
    fn missing_version_lists_installed_versions() {
        let fs = FakeFileSystem::new().dir("/dist/poppler-linux-fonts/poppler-24.08/bin");
        let config = config(PopplerOptions::new(), &[("POPPLER_VERSION", "99.99")]);
        let err = resolve(&config, &fs).unwrap_err();
        match err {
            Error::Configuration(message) => {
                assert!(message.contains("24.08"), "{message}");
                assert!(message.contains("installed versions: 24.08)"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invalid_version_is_rejected() {
        let config = config(PopplerOptions::new().version("latest"), &[]);
        assert!(matches!(resolve(&config, &layout()), Err(Error::Configuration(_))));
    }

    #[test]
    fn explicit_path_wins_over_everything() {
        let fs = layout().dir("/custom/poppler/bin");
        let config = config(
            PopplerOptions::new().binary_path("/custom/poppler/bin").version("99.99"),
            &[],
        );
        let resolution = resolve(&config, &fs).unwrap();
        assert_eq!(resolution.directory, PathBuf::from("/custom/poppler/bin"));
        assert_eq!(resolution.binary_root, PathBuf::from("/custom/poppler"));
        assert_eq!(resolution.attempts[0].source, AttemptSource::ExplicitPath);
    }

    #[test]
    fn explicit_path_must_exist() {
        let config = config(PopplerOptions::new().binary_path("/missing/bin"), &[]);
        assert!(matches!(resolve(&config, &layout()), Err(Error::Configuration(_))));
    }

    #[test]
    fn explicit_package_skips_default_order() {
        let config = config(PopplerOptions::new(), &[("POPPLER_PACKAGE", "poppler-linux")]);
        let resolution = resolve(&config, &layout()).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux/poppler-25.01/bin")
        );
    }

    #[test]
    fn unknown_package_is_a_configuration_error() {
        let config = config(PopplerOptions::new().package("poppler-beos"), &[]);
        assert!(matches!(resolve(&config, &layout()), Err(Error::Configuration(_))));
    }

    #[test]
    fn second_default_package_is_used_when_first_is_absent() {
        let fs = FakeFileSystem::new().dir("/dist/poppler-linux/poppler-23.01/bin");
        let config = config(PopplerOptions::new(), &[]);
        let resolution = resolve(&config, &fs).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux/poppler-23.01/bin")
        );
        assert_eq!(resolution.attempts[0].outcome, AttemptOutcome::Missing);
        assert_eq!(resolution.attempts[1].outcome, AttemptOutcome::Selected);
    }

    #[test]
    fn incomplete_fonts_package_falls_through_to_plain_package() {
        let fs = FakeFileSystem::new()
            .dir("/dist/poppler-linux-fonts/fonts-only")
            .dir("/dist/poppler-linux/poppler-24.08/bin");
        let resolution = resolve(&config(PopplerOptions::new(), &[]), &fs).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux/poppler-24.08/bin")
        );
        let fonts = &resolution.attempts[0];
        assert_eq!(fonts.candidate, PathBuf::from("/dist/poppler-linux-fonts"));
        assert_eq!(fonts.outcome, AttemptOutcome::Skipped);
        assert_eq!(fonts.detail.as_deref(), Some("no usable build"));
    }

    #[test]
    fn requested_version_is_searched_in_every_default_package() {
        let fs = FakeFileSystem::new()
            .dir("/dist/poppler-linux-fonts/poppler-24.08/bin")
            .dir("/dist/poppler-linux/poppler-23.01/bin");
        let config = config(PopplerOptions::new().version("23.01"), &[]);
        let resolution = resolve(&config, &fs).unwrap();
        assert_eq!(
            resolution.directory,
            PathBuf::from("/dist/poppler-linux/poppler-23.01/bin")
        );
    }

    #[test]
    fn missing_version_lists_versions_of_all_packages() {
        let fs = FakeFileSystem::new()
            .dir("/dist/poppler-linux-fonts/poppler-24.08/bin")
            .dir("/dist/poppler-linux/poppler-23.01/bin")
            .dir("/dist/poppler-linux/poppler-24.08-xvfb/bin");
        let config = config(PopplerOptions::new().version("99.99"), &[]);
        match resolve(&config, &fs).unwrap_err() {
            Error::Configuration(message) => assert!(
                message.contains("installed versions: 24.08, 23.01)"),
                "{message}"
            ),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn legacy_directories_follow_display_preference() {
        let fs = FakeFileSystem::new()
            .dir("/dist/poppler-linux-fonts/poppler/bin")
            .dir("/dist/poppler-linux-fonts/poppler-xvfb/bin");

        let plain = resolve(&config(PopplerOptions::new(), &[]), &fs).unwrap();
        assert_eq!(
            plain.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler/bin")
        );

        let ci = resolve(&config(PopplerOptions::new(), &[("CI", "1")]), &fs).unwrap();
        assert_eq!(
            ci.directory,
            PathBuf::from("/dist/poppler-linux-fonts/poppler-xvfb/bin")
        );
    }

    #[test]
    fn nothing_installed_is_executable_not_found() {
        let fs = FakeFileSystem::new().dir("/dist/poppler-linux-fonts");
        let err = resolve(&config(PopplerOptions::new(), &[]), &fs).unwrap_err();
        match err {
            Error::ExecutableNotFound { searched, .. } => assert_eq!(searched.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
        let err = resolve(&config(PopplerOptions::new(), &[]), &FakeFileSystem::new()).unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound { .. }));
    }

    #[test]
    fn highest_preferred_or_highest_overall_for_every_layout() {
        // Propriété: pour toute combinaison de builds installés, le choix sans
        // version est le plus haut de la variante préférée, sinon le plus haut.
        let builds = [("20.01", false), ("21.03", true), ("22.02", false), ("23.05", true)];
        for mask in 1u32..(1 << builds.len()) {
            let mut fs = FakeFileSystem::new();
            let installed: Vec<(&str, bool)> = builds
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, b)| *b)
                .collect();
            for (version, xvfb) in &installed {
                let suffix = if *xvfb { "-xvfb" } else { "" };
                fs = fs.dir(format!("/dist/poppler-linux-fonts/poppler-{version}{suffix}/bin"));
            }
            for prefer in [true, false] {
                let config = config(PopplerOptions::new().prefer_virtual_display(prefer), &[]);
                let resolution = resolve(&config, &fs).unwrap();
                let expected = installed
                    .iter()
                    .filter(|(_, xvfb)| *xvfb == prefer)
                    .max_by(|a, b| Version::parse(a.0).cmp(&Version::parse(b.0)))
                    .or_else(|| {
                        installed
                            .iter()
                            .max_by(|a, b| Version::parse(a.0).cmp(&Version::parse(b.0)))
                    })
                    .unwrap();
                let suffix = if expected.1 { "-xvfb" } else { "" };
                assert_eq!(
                    resolution.directory,
                    PathBuf::from(format!(
                        "/dist/poppler-linux-fonts/poppler-{}{}/bin",
                        expected.0, suffix
                    )),
                    "mask={mask} prefer={prefer}"
                );
            }
        }
    }
}
