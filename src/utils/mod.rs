/// Utilitaires transverses de chemins et d'accès au système de fichiers.
pub mod path;
/// Utilitaires transverses de gestion de process externes.
pub mod process;
