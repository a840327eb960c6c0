//! Détection du contexte d'exécution (serverless, CI, affichage) à partir des
//! seules variables d'environnement.

use std::collections::BTreeMap;

use serde::Serialize;

/// Instantané des variables d'environnement de l'hôte.
pub type EnvMap = BTreeMap<String, String>;

const SERVERLESS_MARKERS: &[&str] = &[
    "AWS_LAMBDA_FUNCTION_NAME",
    "LAMBDA_TASK_ROOT",
    "FUNCTION_TARGET",
    "K_SERVICE",
    "FUNCTIONS_WORKER_RUNTIME",
    "VERCEL",
];

const CI_MARKERS: &[&str] = &[
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "CIRCLECI",
    "JENKINS_URL",
    "TF_BUILD",
    "TRAVIS",
];

const TEST_RUNNER_MARKERS: &[&str] = &[
    "JEST_WORKER_ID",
    "VITEST",
    "NEXTEST_RUN_ID",
    "PYTEST_CURRENT_TEST",
];

const DISPLAY_VARIABLES: &[&str] = &["DISPLAY", "WAYLAND_DISPLAY"];

/// Contexte d'exécution figé, calculé une seule fois par instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeContext {
    /// Invocation serverless (système de fichiers majoritairement en lecture seule).
    pub is_serverless: bool,
    /// Runner d'intégration continue sans surveillance.
    pub is_ci: bool,
    /// Un serveur d'affichage est déjà attaché.
    pub has_display: bool,
}

impl RuntimeContext {
    /// Calcule le contexte depuis un instantané d'environnement, sans effet de bord.
    pub fn detect(env: &EnvMap) -> Self {
        Self {
            is_serverless: is_serverless(env),
            is_ci: is_ci(env),
            has_display: has_display(env),
        }
    }

    /// Calcule le contexte depuis l'environnement du process courant.
    pub fn from_process_env() -> Self {
        Self::detect(&std::env::vars().collect())
    }
}

fn non_empty(env: &EnvMap, key: &str) -> bool {
    env.get(key).map(|value| !value.trim().is_empty()).unwrap_or(false)
}

/// Indique si une valeur de variable doit être lue comme "vraie".
pub(crate) fn is_truthy(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    !normalized.is_empty() && normalized != "0" && normalized != "false"
}

/// Lit un booléen explicite (`true/1/yes` ou `false/0/no`); `None` sinon.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Retourne vrai pour Lambda, Cloud Functions / Cloud Run, Azure Functions et Vercel.
pub fn is_serverless(env: &EnvMap) -> bool {
    if SERVERLESS_MARKERS.iter().any(|key| non_empty(env, key)) {
        return true;
    }
    env.get("AWS_EXECUTION_ENV")
        .map(|value| value.starts_with("AWS_Lambda"))
        .unwrap_or(false)
}

/// Retourne vrai sur un runner CI.
pub fn is_ci(env: &EnvMap) -> bool {
    if env.get("CI").map(|value| is_truthy(value)).unwrap_or(false) {
        return true;
    }
    CI_MARKERS.iter().any(|key| non_empty(env, key))
}

/// Retourne vrai si un affichage X11 ou Wayland est déjà disponible.
pub fn has_display(env: &EnvMap) -> bool {
    DISPLAY_VARIABLES.iter().any(|key| non_empty(env, key))
}

/// Retourne vrai si un lanceur de tests sans surveillance est détecté.
pub fn has_test_runner_marker(env: &EnvMap) -> bool {
    TEST_RUNNER_MARKERS.iter().any(|key| non_empty(env, key))
}
