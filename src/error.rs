use std::{io, result};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("corrupted data: {0}")]
    Corruption(String),

    #[error("format error")]
    FormatError {
        #[from]
        source: io::Error,
    },
}

pub type Result<T> = result::Result<T, Error>;
