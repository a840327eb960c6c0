use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::utils::path::FileSystem;

lazy_static::lazy_static! {
    /// Nom d'un dossier versionné: `poppler-24.08` ou `poppler-21.03-xvfb`.
    static ref VERSIONED_DIR: Regex = Regex::new(r"^poppler-(\d+)\.(\d+)(-xvfb)?$").unwrap();
}

/// Version `majeur.mineur` telle qu'écrite dans le nom du dossier.
#[derive(Clone, Debug, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    /// Texte d'origine (`24.08`), conservé pour les messages.
    pub raw: String,
}

impl Version {
    /// Analyse une version `majeur.mineur`; `None` si le format est invalide.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (major, minor) = raw.split_once('.')?;
        if major.is_empty() || minor.is_empty() {
            return None;
        }
        if !major.bytes().all(|b| b.is_ascii_digit()) || !minor.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
            raw: raw.to_string(),
        })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Build installé dans un paquet de distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    pub version: Version,
    pub has_virtual_display_bundle: bool,
    /// Racine du build (`.../poppler-24.08`), parent de `bin/`.
    pub directory: PathBuf,
}

/// Parcourt un paquet et retourne les builds versionnés qu'il contient.
///
/// Les entrées sont triées par version décroissante puis par variante
/// préférée. Un paquet illisible donne une liste vide.
pub fn scan(package_dir: &Path, prefer_virtual_display: bool, fs: &dyn FileSystem) -> Vec<VersionEntry> {
    let names = match fs.list_dir(package_dir) {
        Ok(names) => names,
        Err(err) => {
            log::debug!(
                "[poppler][catalog] unable to list {}: {}",
                package_dir.display(),
                err
            );
            return Vec::new();
        }
    };

    let mut entries: Vec<VersionEntry> = names
        .iter()
        .filter_map(|name| parse_entry(package_dir, name))
        .filter(|entry| fs.is_dir(&entry.directory))
        .collect();
    sort_entries(&mut entries, prefer_virtual_display);
    entries
}

fn parse_entry(package_dir: &Path, name: &str) -> Option<VersionEntry> {
    let captures = VERSIONED_DIR.captures(name)?;
    let major = captures.get(1)?.as_str();
    let minor = captures.get(2)?.as_str();
    Some(VersionEntry {
        version: Version::parse(&format!("{major}.{minor}"))?,
        has_virtual_display_bundle: captures.get(3).is_some(),
        directory: package_dir.join(name),
    })
}

/// Trie par version décroissante, la variante préférée en premier à version égale.
pub fn sort_entries(entries: &mut [VersionEntry], prefer_virtual_display: bool) {
    entries.sort_by(|a, b| {
        b.version.cmp(&a.version).then_with(|| {
            let a_pref = a.has_virtual_display_bundle == prefer_virtual_display;
            let b_pref = b.has_virtual_display_bundle == prefer_virtual_display;
            b_pref.cmp(&a_pref)
        })
    });
}

/// Versions installées, décroissantes et sans doublon.
pub fn installed_versions(entries: &[VersionEntry]) -> Vec<String> {
    let mut versions: Vec<&Version> = entries.iter().map(|entry| &entry.version).collect();
    versions.sort_by(|a, b| b.cmp(a));
    versions.dedup();
    versions.into_iter().map(|v| v.raw.clone()).collect()
}
