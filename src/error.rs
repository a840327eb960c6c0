use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Type `Result` commun à la bibliothèque.
pub type Result<T> = std::result::Result<T, Error>;

/// Catégorie d'échec exploitable sans analyse de texte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Le document est illisible, corrompu ou n'est pas un PDF.
    InvalidInput,
    /// Le document est chiffré ou protégé par mot de passe.
    PasswordProtected,
    /// La page demandée dépasse le nombre de pages du document.
    PageOutOfRange { page: u32, total: u32 },
    /// L'exécutable n'a pas pu être lancé faute d'exister.
    ExecutableNotFound { name: String },
    /// Aucune règle ne correspond, le message et le diagnostic sont conservés.
    Unclassified,
}

/// Échec d'un process classé, qui conserve toujours le diagnostic brut.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq, Serialize)]
#[error("{}", self.describe())]
pub struct ClassifiedError {
    pub kind: FailureKind,
    pub message: String,
    pub diagnostics: String,
}

impl ClassifiedError {
    pub fn new(kind: FailureKind, message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    fn describe(&self) -> String {
        let summary = match &self.kind {
            FailureKind::InvalidInput => "invalid or corrupted PDF input".to_string(),
            FailureKind::PasswordProtected => "PDF is encrypted or password protected".to_string(),
            FailureKind::PageOutOfRange { page, total } => {
                format!("page {page} is out of range (document has {total} pages)")
            }
            FailureKind::ExecutableNotFound { name } => format!("executable not found: {name}"),
            FailureKind::Unclassified => self.message.clone(),
        };
        match (&self.kind, self.diagnostics.is_empty()) {
            (_, true) => summary,
            (FailureKind::Unclassified, false) => format!("{summary} ({})", self.diagnostics),
            (_, false) => format!("{summary}: {}", self.diagnostics),
        }
    }
}

/// Erreurs de résolution, de configuration et d'exécution.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Configuration insatisfiable (version absente, plateforme non supportée...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Aucun répertoire d'exécutables utilisable n'a été trouvé.
    #[error("executable not found: {name} (searched {} location(s))", searched.len())]
    ExecutableNotFound { name: String, searched: Vec<PathBuf> },

    /// Le process a échoué; l'erreur est classée et garde son diagnostic.
    #[error("{0}")]
    Process(ClassifiedError),

    /// Le process a dépassé son délai et a été terminé.
    #[error("{program} timed out after {timeout:?}")]
    TimedOut {
        program: String,
        timeout: Duration,
        diagnostics: String,
    },

    /// La sortie a dépassé la taille maximale autorisée.
    #[error("{program} produced more than {limit} bytes of output")]
    OutputTooLarge { program: String, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Retourne l'erreur classée quand l'échec vient du process.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Error::Process(classified) => Some(classified),
            _ => None,
        }
    }

    /// Retourne la catégorie d'échec quand elle existe.
    pub fn kind(&self) -> Option<&FailureKind> {
        self.classified().map(|classified| &classified.kind)
    }

    /// Copie de l'erreur; une erreur d'E/S garde sa catégorie et son message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Configuration(message) => Error::Configuration(message.clone()),
            Error::ExecutableNotFound { name, searched } => Error::ExecutableNotFound {
                name: name.clone(),
                searched: searched.clone(),
            },
            Error::Process(classified) => Error::Process(classified.clone()),
            Error::TimedOut {
                program,
                timeout,
                diagnostics,
            } => Error::TimedOut {
                program: program.clone(),
                timeout: *timeout,
                diagnostics: diagnostics.clone(),
            },
            Error::OutputTooLarge { program, limit } => Error::OutputTooLarge {
                program: program.clone(),
                limit: *limit,
            },
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

impl From<ClassifiedError> for Error {
    fn from(value: ClassifiedError) -> Self {
        Error::Process(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_display_keeps_diagnostics() {
        let err = ClassifiedError::new(
            FailureKind::PasswordProtected,
            "pdftotext exited with status 1",
            "Command Line Error: Incorrect password",
        );
        let text = err.to_string();
        assert!(text.contains("password protected"));
        assert!(text.contains("Incorrect password"));
    }

    #[test]
    fn classified_display_per_kind() {
        let invalid = ClassifiedError::new(FailureKind::InvalidInput, "exit 1", "Syntax Error: damaged");
        assert_eq!(
            invalid.to_string(),
            "invalid or corrupted PDF input: Syntax Error: damaged"
        );

        let unclassified = ClassifiedError::new(FailureKind::Unclassified, "pdfinfo exited with status 99", "odd");
        assert_eq!(unclassified.to_string(), "pdfinfo exited with status 99 (odd)");

        let missing = ClassifiedError::new(
            FailureKind::ExecutableNotFound {
                name: "pdftocairo".to_string(),
            },
            "No such file or directory",
            "",
        );
        assert_eq!(missing.to_string(), "executable not found: pdftocairo");
        let source: &dyn std::error::Error = &missing;
        assert!(source.source().is_none());
    }

    #[test]
    fn duplicate_keeps_variant_and_text() {
        let timed_out = Error::TimedOut {
            program: "pdftoppm".to_string(),
            timeout: Duration::from_secs(2),
            diagnostics: "rendering".to_string(),
        };
        let copy = timed_out.duplicate();
        assert!(matches!(copy, Error::TimedOut { ref diagnostics, .. } if diagnostics == "rendering"));
        assert_eq!(copy.to_string(), timed_out.to_string());

        let io = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        match io.duplicate() {
            Error::Io(err) => {
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
                assert_eq!(err.to_string(), "pipe closed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn page_out_of_range_is_structured() {
        let err = Error::Process(ClassifiedError::new(
            FailureKind::PageOutOfRange { page: 9, total: 3 },
            "page out of range",
            "",
        ));
        assert_eq!(err.kind(), Some(&FailureKind::PageOutOfRange { page: 9, total: 3 }));
        assert_eq!(err.to_string(), "page 9 is out of range (document has 3 pages)");
    }

    #[test]
    fn kind_serializes_with_tag() {
        let json = serde_json::to_value(FailureKind::ExecutableNotFound {
            name: "pdfinfo".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "executable_not_found");
        assert_eq!(json["name"], "pdfinfo");
    }
}
