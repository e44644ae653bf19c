use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::mem;

const READ_BUFFER_BYTES: usize = 8192;

#[derive(Debug)]
pub(crate) enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
        /// False for a trailing line that ended at EOF without `\n`.
        terminated: bool,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
        kind: ErrorKind,
    },
}

/// The line currently being assembled.
enum Partial {
    Collecting(Vec<u8>),
    /// Past the cap: bytes are counted and dropped until the next `\n`.
    Overflowed { observed: usize },
}

impl Partial {
    fn empty() -> Self {
        Partial::Collecting(Vec::new())
    }

    fn absorb(&mut self, bytes: &[u8], max_line_bytes: usize) {
        match self {
            Partial::Collecting(line) => {
                let observed = line.len().saturating_add(bytes.len());
                if observed <= max_line_bytes {
                    line.extend_from_slice(bytes);
                } else {
                    *self = Partial::Overflowed { observed };
                }
            }
            Partial::Overflowed { observed } => {
                *observed = observed.saturating_add(bytes.len());
            }
        }
    }

    fn is_pending(&self) -> bool {
        match self {
            Partial::Collecting(line) => !line.is_empty(),
            Partial::Overflowed { .. } => true,
        }
    }
}

/// Splits a byte stream into `\n`-terminated lines, holding at most `max_line_bytes` of any one
/// line. Iteration ends at EOF or at the first read error, which is yielded as
/// [`BoundedLine::IoError`].
pub(crate) struct CappedLineReader<R: Read> {
    source: BufReader<R>,
    max_line_bytes: usize,
    partial: Partial,
    line_number: usize,
    finished: bool,
}

impl<R: Read> CappedLineReader<R> {
    pub(crate) fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            source: BufReader::with_capacity(READ_BUFFER_BYTES, reader),
            max_line_bytes,
            partial: Partial::empty(),
            line_number: 0,
            finished: false,
        }
    }

    fn next_line_number(&mut self) -> usize {
        self.line_number += 1;
        self.line_number
    }

    fn emit(&mut self, terminated: bool) -> BoundedLine {
        let line_number = self.next_line_number();
        match mem::replace(&mut self.partial, Partial::empty()) {
            Partial::Collecting(bytes) => BoundedLine::Line {
                line_number,
                bytes,
                terminated,
            },
            Partial::Overflowed { observed } => BoundedLine::LineTooLong {
                line_number,
                observed_bytes: observed,
                max_line_bytes: self.max_line_bytes,
            },
        }
    }
}

impl<R: Read> Iterator for CappedLineReader<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let chunk = match self.source.fill_buf() {
                Ok(chunk) => chunk,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.finished = true;
                    let line_number = self.next_line_number();
                    return Some(BoundedLine::IoError {
                        line_number,
                        kind: err.kind(),
                    });
                }
            };

            if chunk.is_empty() {
                self.finished = true;
                return self.partial.is_pending().then(|| self.emit(false));
            }

            let newline = chunk.iter().position(|byte| *byte == b'\n');
            let segment = newline.unwrap_or(chunk.len());
            self.partial.absorb(&chunk[..segment], self.max_line_bytes);
            match newline {
                Some(at) => {
                    self.source.consume(at + 1);
                    return Some(self.emit(true));
                }
                None => self.source.consume(segment),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_line_is_discarded_and_iteration_continues() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ok\n");
        bytes.extend_from_slice(&vec![b'a'; 50]);
        bytes.extend_from_slice(b"\nnext\n");

        let reader = CappedLineReader::new(std::io::Cursor::new(bytes), 16);
        let lines: Vec<_> = reader.collect();

        assert_eq!(lines.len(), 3);
        assert!(matches!(&lines[0], BoundedLine::Line { bytes, .. } if bytes == b"ok"));
        assert!(matches!(
            lines[1],
            BoundedLine::LineTooLong {
                line_number: 2,
                observed_bytes: 50,
                max_line_bytes: 16
            }
        ));
        assert!(matches!(
            &lines[2],
            BoundedLine::Line { line_number: 3, bytes, .. } if bytes == b"next"
        ));
    }

    #[test]
    fn line_at_the_cap_is_kept() {
        let reader = CappedLineReader::new(std::io::Cursor::new(b"abcd\nabcde\n".to_vec()), 4);
        let lines: Vec<_> = reader.collect();

        assert!(matches!(&lines[0], BoundedLine::Line { bytes, .. } if bytes == b"abcd"));
        assert!(matches!(lines[1], BoundedLine::LineTooLong { observed_bytes: 5, .. }));
    }

    #[test]
    fn trailing_line_without_newline_is_reported_unterminated() {
        let reader = CappedLineReader::new(std::io::Cursor::new(b"one\ntw".to_vec()), 64);
        let lines: Vec<_> = reader.collect();

        assert_eq!(lines.len(), 2);
        assert!(matches!(
            &lines[0],
            BoundedLine::Line { terminated: true, bytes, .. } if bytes == b"one"
        ));
        assert!(matches!(
            &lines[1],
            BoundedLine::Line { terminated: false, line_number: 2, bytes } if bytes == b"tw"
        ));
    }

    #[test]
    fn interrupted_reads_are_retried() {
        struct Flaky {
            interrupted: bool,
            data: std::io::Cursor<&'static [u8]>,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.read(buf)
            }
        }

        let source = Flaky {
            interrupted: false,
            data: std::io::Cursor::new(&b"line\n"[..]),
        };
        let lines: Vec<_> = CappedLineReader::new(source, 64).collect();
        assert_eq!(lines.len(), 1);
        assert!(matches!(&lines[0], BoundedLine::Line { bytes, .. } if bytes == b"line"));
    }

    #[test]
    fn read_failure_ends_iteration() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::PermissionDenied, "denied"))
            }
        }

        let mut reader = CappedLineReader::new(Broken, 64);
        assert!(matches!(
            reader.next(),
            Some(BoundedLine::IoError {
                line_number: 1,
                kind: ErrorKind::PermissionDenied
            })
        ));
        assert!(reader.next().is_none());
    }
}
