//! JSON-lines manifest encoding: the header on the first line, then one
//! node record per line.

use std::io::{BufRead, Write};

use super::{ManifestHeader, ManifestNode};
use crate::error::TransferError;

/// Streams a manifest to a writer.
pub struct ManifestWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> ManifestWriter<W> {
    /// Writes the header line.
    pub fn new(mut inner: W, header: &ManifestHeader) -> Result<Self, TransferError> {
        serde_json::to_writer(&mut inner, header)?;
        inner.write_all(b"\n")?;
        Ok(Self { inner, written: 0 })
    }

    /// Appends one node record.
    pub fn write_node(&mut self, node: &ManifestNode) -> Result<(), TransferError> {
        serde_json::to_writer(&mut self.inner, node)?;
        self.inner.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Number of node records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, TransferError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reads a manifest back. The header is parsed eagerly; node records are
/// yielded lazily and blank lines are skipped.
pub struct ManifestReader<R: BufRead> {
    inner: R,
    header: ManifestHeader,
    record: usize,
    line: String,
}

impl<R: BufRead> ManifestReader<R> {
    /// Parses the header line.
    pub fn new(mut inner: R) -> Result<Self, TransferError> {
        let mut line = String::new();
        loop {
            line.clear();
            if inner.read_line(&mut line)? == 0 {
                return Err(TransferError::Manifest {
                    record: 0,
                    msg: "manifest has no header".to_string(),
                });
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        let header: ManifestHeader =
            serde_json::from_str(line.trim()).map_err(|e| TransferError::Manifest {
                record: 0,
                msg: e.to_string(),
            })?;
        Ok(Self {
            inner,
            header,
            record: 0,
            line,
        })
    }

    /// The manifest header.
    pub fn header(&self) -> &ManifestHeader {
        &self.header
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<ManifestNode, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.inner.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            self.record += 1;
            return Some(
                serde_json::from_str(text).map_err(|e| TransferError::Manifest {
                    record: self.record,
                    msg: e.to_string(),
                }),
            );
        }
    }
}
