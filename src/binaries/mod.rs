pub mod catalog;
mod diagnostics;
pub mod permissions;
mod resolver;

pub use catalog::{Version, VersionEntry};
pub use diagnostics::{AttemptOutcome, AttemptSource, ResolutionAttempt, RuntimeReport};
pub use resolver::{resolve, Resolution};
