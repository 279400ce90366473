//! CSV record source
//!
//! Reads the input on a blocking thread and feeds the pipeline channels:
//! exactly one header (or one fatal error), then rows in file order, with
//! recoverable per-line errors sent on the error conduit. Every sender is
//! dropped when [`CsvSource::run`] returns, which is the end-of-stream signal.
//!
//! Each physical line is parsed on its own. Quoting is checked strictly
//! before the line is tokenized so that one malformed line never swallows
//! the lines after it.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::channel::SourceChannels;
use crate::document::{Header, SourceRow};
use crate::reporter::{PipelineEvent, Reporter};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const QUOTE: u8 = b'"';

/// Why a single line could not be turned into fields
#[derive(Error, Debug)]
pub enum RowError {
    #[error("bare \" in non-quoted field {field}")]
    BareQuote { field: usize },

    #[error("extraneous \" after quoted field {field}")]
    ExtraneousQuote { field: usize },

    #[error("unterminated quoted field {field}")]
    UnterminatedQuote { field: usize },

    #[error("invalid UTF-8 at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("{0}")]
    Csv(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the source. Only [`SourceError::Row`] is recoverable.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("error opening file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV file {} is empty", .path.display())]
    Empty { path: PathBuf },

    #[error("error reading header from CSV {}: {source}", .path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: RowError,
    },

    #[error("error reading record at line {line} from CSV {}: {source}. Skipping row", .path.display())]
    Row {
        path: PathBuf,
        line: u64,
        #[source]
        source: RowError,
    },
}

impl SourceError {
    /// Fatal errors happen before a header exists and end the run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::Row { .. })
    }

    pub fn line(&self) -> Option<u64> {
        match self {
            SourceError::Row { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Splits one physical line into fields
#[derive(Debug)]
pub struct LineParser {
    delimiter: u8,
    builder: csv::ReaderBuilder,
}

impl LineParser {
    pub fn new(delimiter: u8) -> Self {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .terminator(csv::Terminator::Any(b'\n'));
        Self { delimiter, builder }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Parse a line that has already had its line ending removed
    pub fn parse(&self, line: &[u8]) -> Result<Vec<String>, RowError> {
        check_quoting(line, self.delimiter)?;

        let text = std::str::from_utf8(line).map_err(|e| RowError::InvalidUtf8 {
            offset: e.valid_up_to(),
        })?;

        let mut reader = self.builder.from_reader(text.as_bytes());
        let mut record = csv::StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(true) => Ok(record.iter().map(str::to_string).collect()),
            Ok(false) => Ok(Vec::new()),
            Err(e) => Err(RowError::Csv(e.to_string())),
        }
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(b',')
    }
}

/// Reject the quoting mistakes a lenient tokenizer would silently accept.
fn check_quoting(line: &[u8], delimiter: u8) -> Result<(), RowError> {
    let mut pos = 0;
    let mut field = 1;

    loop {
        if line.get(pos) == Some(&QUOTE) {
            pos += 1;
            loop {
                match line.get(pos) {
                    None => return Err(RowError::UnterminatedQuote { field }),
                    Some(&QUOTE) if line.get(pos + 1) == Some(&QUOTE) => pos += 2,
                    Some(&QUOTE) => {
                        pos += 1;
                        break;
                    },
                    Some(_) => pos += 1,
                }
            }
            match line.get(pos) {
                None => return Ok(()),
                Some(&b) if b == delimiter => pos += 1,
                Some(_) => return Err(RowError::ExtraneousQuote { field }),
            }
        } else {
            loop {
                match line.get(pos) {
                    None => return Ok(()),
                    Some(&b) if b == delimiter => {
                        pos += 1;
                        break;
                    },
                    Some(&QUOTE) => return Err(RowError::BareQuote { field }),
                    Some(_) => pos += 1,
                }
            }
        }
        field += 1;
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Producer half of the pipeline
pub struct CsvSource {
    path: PathBuf,
    parser: LineParser,
    reporter: Arc<dyn Reporter>,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            path: path.into(),
            parser: LineParser::default(),
            reporter,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.parser = LineParser::new(delimiter);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run on tokio's blocking pool
    pub fn spawn(self, channels: SourceChannels) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run(channels))
    }

    /// Read the whole input, blocking the current thread.
    ///
    /// Returns early if the consumer hangs up. The file handle and all
    /// senders are released on every return path.
    pub fn run(self, channels: SourceChannels) {
        let SourceChannels {
            header: header_tx,
            rows: row_tx,
            errors: error_tx,
        } = channels;

        self.reporter.report(&PipelineEvent::SourceOpening {
            path: self.path.clone(),
        });

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(source) => {
                let _ = error_tx.blocking_send(SourceError::Open {
                    path: self.path.clone(),
                    source,
                });
                return;
            },
        };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_no: u64 = 0;

        let header = loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    let _ = error_tx.blocking_send(SourceError::Empty {
                        path: self.path.clone(),
                    });
                    return;
                },
                Ok(_) => {
                    line_no += 1;
                    let mut line = trim_line_ending(&buf);
                    if line_no == 1 {
                        line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
                    }
                    if line.is_empty() {
                        continue;
                    }
                    match self.parser.parse(line) {
                        Ok(fields) => break Header::new(fields),
                        Err(source) => {
                            let _ = error_tx.blocking_send(SourceError::Header {
                                path: self.path.clone(),
                                source,
                            });
                            return;
                        },
                    }
                },
                Err(e) => {
                    let _ = error_tx.blocking_send(SourceError::Header {
                        path: self.path.clone(),
                        source: RowError::Io(e),
                    });
                    return;
                },
            }
        };

        if header_tx.send(header).is_err() {
            return;
        }

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    line_no += 1;
                    let line = trim_line_ending(&buf);
                    if line.is_empty() {
                        continue;
                    }
                    let delivered = match self.parser.parse(line) {
                        Ok(fields) => row_tx.blocking_send(SourceRow::new(line_no, fields)).is_ok(),
                        Err(source) => error_tx
                            .blocking_send(SourceError::Row {
                                path: self.path.clone(),
                                line: line_no,
                                source,
                            })
                            .is_ok(),
                    };
                    if !delivered {
                        return;
                    }
                },
                Err(e) => {
                    let _ = error_tx.blocking_send(SourceError::Row {
                        path: self.path.clone(),
                        line: line_no + 1,
                        source: RowError::Io(e),
                    });
                    return;
                },
            }
        }

        self.reporter.report(&PipelineEvent::SourceExhausted {
            path: self.path.clone(),
            lines: line_no,
        });
    }
}
