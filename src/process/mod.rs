//! Lancement et supervision des process poppler.

mod input;
mod release;
mod stream;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use tokio::process::Command;

pub use input::{PdfInput, STDIN_PLACEHOLDER};
pub use release::{ReleaseOnce, ReleaseReason};
pub use stream::{run, spawn, OutputStream};

/// Commande prête à être lancée, environnement complet compris.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedCommand {
    /// Nom de l'outil poppler, utilisé dans les messages d'erreur.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Environnement exact du process; celui de l'hôte n'est pas hérité.
    pub env: BTreeMap<String, String>,
}

impl PreparedCommand {
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env_clear().envs(&self.env);
        cmd
    }

    /// Ligne de commande lisible, pour les journaux et les diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy())
            .chain(self.args.iter().map(|arg| arg.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
