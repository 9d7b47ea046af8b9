//! Nançay Decameter Array spectrograph files.
//!
//! Two generations are supported: the "Routine" receiver's `.RT1` files (an
//! ASCII header then 8-bit sweeps), and the "NewRoutine" receiver's `.dat`
//! files (little-endian, with magic words on the header and every record).

mod new_routine;
mod routine;

pub use new_routine::{NewRoutineHeader, NewRoutineReader};
pub use routine::{RoutineHeader, RoutineReader};

use std::path::PathBuf;

use thiserror::Error;

/// The first word of a NewRoutine file.
pub const NEW_ROUTINE_HEADER_MAGIC: u32 = 0x7F7F_7F7F;

/// The first word of every NewRoutine record.
pub const NEW_ROUTINE_RECORD_MAGIC: u32 = 0xFF7F_7F7F;

#[derive(Error, Debug)]
pub enum NdaError {
    #[error("{}: couldn't find the observation {what} in the header", file.display())]
    MissingHeaderField { file: PathBuf, what: &'static str },

    #[error("{}: header size {header_size} is smaller than the {min} bytes it must hold", file.display())]
    HeaderTooSmall {
        file: PathBuf,
        header_size: u32,
        min: u32,
    },
}
