//! Errors from writing dynamic spectra.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Expected {expected} sweeps, but only {received} arrived before the input stopped")]
    MissingSweeps { expected: usize, received: usize },

    #[error("Received a sweep of shape {got:?}, but expected {expected:?}")]
    BadSweepShape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Couldn't write {}: {err}", file.display())]
    Fits {
        file: PathBuf,
        err: Box<fitsio::errors::Error>,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
