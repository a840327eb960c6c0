//! Classement heuristique des échecs de process par correspondance de texte.

use crate::error::{ClassifiedError, FailureKind};

/// Phrases signalant un document chiffré ou protégé.
pub const PASSWORD_PHRASES: &[&str] = &["encrypted", "password", "permission denied"];

/// Phrases signalant un document illisible ou un appel invalide.
pub const CORRUPTION_PHRASES: &[&str] = &[
    "not a pdf",
    "invalid pdf",
    "corrupted",
    "couldn't open",
    "error opening",
    "syntax error",
    "command line error",
    "damaged",
];

/// Classe un échec à partir du message d'erreur et du diagnostic (stderr).
///
/// Fonction pure: la même entrée produit toujours le même résultat. Les règles
/// mot de passe passent avant les règles de corruption, car poppler signale
/// un mauvais mot de passe par une "Command Line Error".
pub fn classify(message: &str, diagnostics: &str) -> ClassifiedError {
    let haystack = format!("{message}\n{diagnostics}").to_lowercase();

    let kind = if PASSWORD_PHRASES.iter().any(|phrase| haystack.contains(phrase)) {
        FailureKind::PasswordProtected
    } else if CORRUPTION_PHRASES
        .iter()
        .any(|phrase| haystack.contains(phrase))
    {
        FailureKind::InvalidInput
    } else {
        FailureKind::Unclassified
    };

    ClassifiedError::new(kind, message, diagnostics)
}

/// Vérifie qu'une page (numérotée à partir de 1) existe dans le document.
pub fn ensure_page_in_range(page: u32, total: u32) -> Result<(), ClassifiedError> {
    if page >= 1 && page <= total {
        return Ok(());
    }
    Err(ClassifiedError::new(
        FailureKind::PageOutOfRange { page, total },
        format!("page {page} requested but the document has {total} pages"),
        String::new(),
    ))
}
