//! Entrypoint de la bibliothèque poppler-runner.
//!
//! Résout le build poppler à lancer, construit son environnement, l'enveloppe
//! dans un affichage virtuel quand l'hôte n'en a pas, puis supervise chaque
//! process en mode bufferisé ou en flux. Le point d'entrée est [`Poppler`].
//!
//! ```no_run
//! use poppler_runner::{PdfInput, Poppler, PopplerOptions};
//!
//! # async fn demo() -> poppler_runner::Result<()> {
//! let poppler = Poppler::new(PopplerOptions::new().version("24.08"))?;
//! let input = PdfInput::path("report.pdf");
//! let text = poppler
//!     .run_text("pdftotext", ["-layout".into(), input.argument(), "-".into()], input)
//!     .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

pub mod binaries;
pub mod classify;
pub mod config;
pub mod context;
pub mod display;
pub mod environment;
pub mod error;
pub mod process;
mod runner;
mod utils;

pub use binaries::{AttemptOutcome, AttemptSource, ResolutionAttempt, RuntimeReport, Version};
pub use classify::{classify, ensure_page_in_range};
pub use config::{ExecutionOptions, OutputEncoding, Platform, PopplerOptions, ResolvedConfiguration};
pub use context::RuntimeContext;
pub use error::{ClassifiedError, Error, FailureKind, Result};
pub use process::{OutputStream, PdfInput, PreparedCommand};
pub use runner::{ExecutionPlan, Poppler};
pub use utils::path::{FileSystem, HostFileSystem};
