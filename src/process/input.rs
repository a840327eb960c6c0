use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncRead;

/// Argument qui demande à un outil poppler de lire son entrée sur stdin.
pub const STDIN_PLACEHOLDER: &str = "-";

/// Document PDF passé à un outil, sous l'une de trois formes décidées par l'appelant.
pub enum PdfInput {
    /// Fichier lu directement par l'outil; stdin reste fermé.
    Path(PathBuf),
    /// Contenu en mémoire écrit sur stdin.
    Bytes(Bytes),
    /// Flux copié sur stdin au fil de la lecture.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl PdfInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        PdfInput::Path(path.into())
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        PdfInput::Bytes(bytes.into())
    }

    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        PdfInput::Reader(Box::new(reader))
    }

    /// Argument à placer dans la ligne de commande: le chemin, ou `-` pour stdin.
    pub fn argument(&self) -> OsString {
        match self {
            PdfInput::Path(path) => path.clone().into_os_string(),
            PdfInput::Bytes(_) | PdfInput::Reader(_) => OsString::from(STDIN_PLACEHOLDER),
        }
    }

    pub fn uses_stdin(&self) -> bool {
        !matches!(self, PdfInput::Path(_))
    }
}

impl fmt::Debug for PdfInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfInput::Path(path) => f.debug_tuple("Path").field(path).finish(),
            PdfInput::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            PdfInput::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<PathBuf> for PdfInput {
    fn from(value: PathBuf) -> Self {
        PdfInput::Path(value)
    }
}

impl From<&Path> for PdfInput {
    fn from(value: &Path) -> Self {
        PdfInput::Path(value.to_path_buf())
    }
}

impl From<Bytes> for PdfInput {
    fn from(value: Bytes) -> Self {
        PdfInput::Bytes(value)
    }
}

impl From<Vec<u8>> for PdfInput {
    fn from(value: Vec<u8>) -> Self {
        PdfInput::Bytes(Bytes::from(value))
    }
}
