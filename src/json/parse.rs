//! Purpose: Decode JSON documents from strings and files.
//! Exports: `from_str`, `read_document`, `read_optional_document`.
//! Role: Maps serde_json and IO failures onto `Error` with the offending path attached.
//! Invariants: Decode errors are `ErrorKind::Parse`; read errors are `ErrorKind::Io`.

use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

pub(crate) fn from_str<T: DeserializeOwned>(input: &str) -> Result<T, Error> {
    serde_json::from_str(input).map_err(|err| {
        Error::new(ErrorKind::Parse)
            .with_message(format!("invalid json: {err}"))
            .with_source(err)
    })
}

pub(crate) fn read_document(path: &Path) -> Result<Value, Error> {
    read_optional_document(path)?.ok_or_else(|| {
        Error::new(ErrorKind::Io)
            .with_message("file not found")
            .with_path(path)
    })
}

/// Like `read_document`, but a missing file is `Ok(None)`.
pub(crate) fn read_optional_document(path: &Path) -> Result<Option<Value>, Error> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to read file")
                .with_path(path)
                .with_source(err));
        }
    };
    from_str(&text).map(Some).map_err(|err| err.with_path(path))
}
