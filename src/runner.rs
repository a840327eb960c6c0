//! Instance de wrapper: configuration figée, plan d'exécution et appels.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::binaries::{self, permissions, ResolutionAttempt, RuntimeReport};
use crate::config::{Platform, PopplerOptions, ResolvedConfiguration};
use crate::context::EnvMap;
use crate::display::{self, LauncherCandidate};
use crate::environment;
use crate::error::{ClassifiedError, Error, FailureKind, Result};
use crate::process::{self, OutputStream, PdfInput, PreparedCommand};
use crate::utils::path::{FileSystem, HostFileSystem};

/// Résultat de la résolution, calculé une fois par instance.
#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    pub executable_directory: PathBuf,
    pub binary_root: PathBuf,
    /// Environnement complet transmis à chaque process.
    pub environment: BTreeMap<String, String>,
    pub needs_virtual_display: bool,
    pub launchers: Vec<LauncherCandidate>,
    pub attempts: Vec<ResolutionAttempt>,
}

impl ExecutionPlan {
    fn build(config: &ResolvedConfiguration, fs: &dyn FileSystem) -> Result<Self> {
        let resolution = binaries::resolve(config, fs)?;
        log::info!(
            "[poppler] using executables from {}",
            resolution.directory.display()
        );

        let environment = environment::build(&resolution.binary_root, config, fs);
        let needs_virtual_display = display::needs_virtual_display(config);
        let launchers = display::launcher_candidates(&resolution.binary_root);

        Ok(Self {
            executable_directory: resolution.directory,
            binary_root: resolution.binary_root,
            environment,
            needs_virtual_display,
            launchers,
            attempts: resolution.attempts,
        })
    }
}

struct Inner {
    config: ResolvedConfiguration,
    plan: ExecutionPlan,
    fs: Arc<dyn FileSystem>,
}

/// Point d'entrée pour lancer les outils poppler.
///
/// La configuration et le plan sont figés à la construction et partagés en
/// lecture seule; cloner une instance est peu coûteux. Plusieurs instances
/// configurées différemment peuvent coexister dans un même process.
#[derive(Clone)]
pub struct Poppler {
    inner: Arc<Inner>,
}

impl Poppler {
    /// Construit une instance à partir des options et de l'environnement du process.
    ///
    /// Les erreurs de configuration et de résolution sont retournées ici,
    /// avant tout lancement. Les exécutables de la distribution retenue sont
    /// ensuite rendus exécutables en arrière-plan.
    pub fn new(options: PopplerOptions) -> Result<Self> {
        let host_env: EnvMap = std::env::vars().collect();
        let poppler = Self::with_host(options, host_env, Platform::current()?, Arc::new(HostFileSystem))?;
        let plan = poppler.plan();
        permissions::spawn_mark_executable(permissions::executable_dirs(
            &plan.executable_directory,
            &plan.binary_root,
        ));
        Ok(poppler)
    }

    /// Configuration issue uniquement des variables d'environnement.
    pub fn from_env() -> Result<Self> {
        Self::new(PopplerOptions::new())
    }

    /// Construit une instance sur un hôte explicite (environnement, plateforme, système de fichiers).
    pub fn with_host(
        options: PopplerOptions,
        host_env: EnvMap,
        platform: Platform,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let config = ResolvedConfiguration::build(options, host_env, platform, fs.as_ref())?;
        let plan = ExecutionPlan::build(&config, fs.as_ref())?;
        log::debug!(
            "[poppler] platform={} serverless={} ci={} display={} virtual_display={}",
            config.platform.id(),
            config.context.is_serverless,
            config.context.is_ci,
            config.context.has_display,
            plan.needs_virtual_display
        );
        Ok(Self {
            inner: Arc::new(Inner { config, plan, fs }),
        })
    }

    pub fn config(&self) -> &ResolvedConfiguration {
        &self.inner.config
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.inner.plan
    }

    /// Chemin de l'exécutable d'un outil dans le dossier retenu.
    pub fn executable(&self, tool: &str) -> PathBuf {
        self.inner
            .plan
            .executable_directory
            .join(self.inner.config.platform.exe_name(tool))
    }

    /// Prépare la commande réellement lancée, enveloppe d'affichage comprise.
    pub fn command<I, S>(&self, tool: &str, args: I) -> Result<PreparedCommand>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let program = self.executable(tool);
        if !self.inner.fs.exists(&program) {
            return Err(missing_tool(tool, &program));
        }

        let command = PreparedCommand {
            name: tool.to_string(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            env: self.inner.plan.environment.clone(),
        };
        let (command, mode) = display::wrap(
            command,
            self.inner.plan.needs_virtual_display,
            &self.inner.plan.launchers,
            self.inner.fs.as_ref(),
        );
        log::debug!("[poppler] {tool}: {mode:?}");
        Ok(command)
    }

    /// Lance un outil et retourne toute sa sortie standard.
    pub async fn run<I, S>(&self, tool: &str, args: I, input: PdfInput) -> Result<Bytes>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let command = self.command(tool, args)?;
        process::run(command, input, &self.inner.config.execution).await
    }

    /// Comme `run`, puis décode la sortie avec l'encodage configuré.
    pub async fn run_text<I, S>(&self, tool: &str, args: I, input: PdfInput) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let output = self.run(tool, args, input).await?;
        Ok(self.inner.config.execution.encoding.decode(&output))
    }

    /// Lance un outil et expose sa sortie standard comme un flux.
    ///
    /// Doit être appelée depuis un runtime tokio.
    pub fn stream<I, S>(&self, tool: &str, args: I, input: PdfInput) -> Result<OutputStream>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let command = self.command(tool, args)?;
        process::spawn(command, input, &self.inner.config.execution)
    }

    /// Rapport sérialisable sur la résolution et l'environnement d'exécution.
    pub fn diagnose(&self) -> RuntimeReport {
        let plan = &self.inner.plan;
        let launcher = if plan.needs_virtual_display {
            display::find_launcher(&plan.launchers, self.inner.fs.as_ref())
                .map(|candidate| candidate.path.clone())
        } else {
            None
        };
        RuntimeReport::new(
            &self.inner.config,
            &plan.executable_directory,
            plan.needs_virtual_display,
            launcher,
            plan.attempts.clone(),
        )
    }
}

impl std::fmt::Debug for Poppler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poppler")
            .field("config", &self.inner.config)
            .field("plan", &self.inner.plan)
            .finish()
    }
}

fn missing_tool(tool: &str, program: &Path) -> Error {
    log::warn!("[poppler] {tool} not found at {}", program.display());
    Error::Process(ClassifiedError::new(
        FailureKind::ExecutableNotFound {
            name: tool.to_string(),
        },
        format!("{tool} not found at {}", program.display()),
        String::new(),
    ))
}
