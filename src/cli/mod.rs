pub mod check;
pub mod run;

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Seed the environment from `./.env` (or a parent directory's).
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    dotenv_outcome(dotenvy::dotenv())
}

fn dotenv_outcome(outcome: dotenvy::Result<PathBuf>) -> Result<Option<PathBuf>> {
    match outcome {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e).context("Failed to read .env file"),
    }
}
