use std::io::BufRead;

use super::header::parse_accession;
use crate::error::{IndexError, Result};

/// One protein of the database. The sequence is kept as read (whitespace
/// removed); residues are validated when the shard text is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinRecord {
    pub accession: String,
    /// Header line without the leading `>`.
    pub header: String,
    pub sequence: Vec<u8>,
}

pub struct FastaReader<R: BufRead> {
    reader: R,
    buf: String,
    line: usize,
    done: bool,
    peek_header: Option<(String, usize)>,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line: 0,
            done: false,
            peek_header: None,
        }
    }

    fn read_line(&mut self) -> Result<bool> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf)?;
        if n > 0 {
            self.line += 1;
        }
        Ok(n > 0)
    }

    pub fn next_record(&mut self) -> Result<Option<ProteinRecord>> {
        if self.done {
            return Ok(None);
        }

        // Find header line
        let (header, header_line) = if let Some(h) = self.peek_header.take() {
            h
        } else {
            loop {
                if !self.read_line()? {
                    self.done = true;
                    return Ok(None);
                }
                if let Some(h) = self.buf.strip_prefix('>') {
                    break (h.trim().to_string(), self.line);
                }
                if !self.buf.trim().is_empty() {
                    return Err(IndexError::MalformedFasta {
                        line: self.line,
                        message: "sequence data before the first header".to_string(),
                    });
                }
            }
        };

        let accession = parse_accession(&header).to_string();
        if accession.is_empty() {
            return Err(IndexError::MalformedFasta { line: header_line, message: "empty header".to_string() });
        }

        // Read sequence lines
        let mut sequence: Vec<u8> = Vec::new();
        let mut saw_sequence_line = false;
        loop {
            if !self.read_line()? {
                self.done = true;
                break;
            }
            if let Some(h) = self.buf.strip_prefix('>') {
                self.peek_header = Some((h.trim().to_string(), self.line));
                break;
            }
            saw_sequence_line = true;
            sequence.extend(self.buf.bytes().filter(|b| !b.is_ascii_whitespace()));
        }

        if self.done && !saw_sequence_line {
            return Err(IndexError::MalformedFasta {
                line: header_line,
                message: format!("stream ends after the header of '{accession}'"),
            });
        }

        Ok(Some(ProteinRecord { accession, header, sequence }))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<ProteinRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(r)) => Some(Ok(r)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
