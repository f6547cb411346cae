/// Maximum length of a single inbound protocol line, excluding its terminator.
pub const MAX_LINE_LENGTH: usize = 512;

/// Splits an inbound byte stream into protocol lines.
///
/// Lines are terminated by `\n`, with an optional preceding `\r`. Empty lines
/// are skipped. Any line longer than [`MAX_LINE_LENGTH`] is discarded in its
/// entirety, including the part that arrives after the limit was crossed, and
/// counted in [`oversized_lines`](Self::oversized_lines).
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    discarding: bool,
    oversized: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of lines dropped for exceeding the length limit
    pub fn oversized_lines(&self) -> usize {
        self.oversized
    }

    /// Bytes received that are not yet part of a complete line
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed newly read bytes, returning every line completed by them
    pub fn push(&mut self, mut data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        while let Some(pos) = data.iter().position(|&b| b == b'\n') {
            let (chunk, rest) = data.split_at(pos);
            data = &rest[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(chunk);
            let mut line = self.buffer.as_slice();
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }

            if line.len() > MAX_LINE_LENGTH {
                self.oversized += 1;
            } else if !line.is_empty() {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            self.buffer.clear();
        }

        if !self.discarding {
            self.buffer.extend_from_slice(data);
            // One extra byte of slack for a trailing \r that hasn't been
            // followed by its \n yet
            if self.buffer.len() > MAX_LINE_LENGTH + 1 {
                self.buffer.clear();
                self.discarding = true;
                self.oversized += 1;
            }
        }

        lines
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_complete_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.push(b"NICK bob\r\nUSER bob 0 * :Bob\n"),
            vec!["NICK bob", "USER bob 0 * :Bob"]
        );
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn joins_partial_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"PRIV").is_empty());
        assert!(framer.push(b"MSG #a :hi\r").is_empty());
        assert_eq!(framer.push(b"\nPING"), vec!["PRIVMSG #a :hi"]);
        assert_eq!(framer.pending_len(), 4);
    }

    #[test]
    fn skips_empty_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"\r\n\nQUIT\r\n"), vec!["QUIT"]);
    }

    #[test]
    fn accepts_line_at_limit() {
        let mut framer = LineFramer::new();
        let line = "a".repeat(MAX_LINE_LENGTH);
        let input = format!("{}\r\n", line);

        assert_eq!(framer.push(input.as_bytes()), vec![line]);
        assert_eq!(framer.oversized_lines(), 0);
    }

    #[test]
    fn drops_oversized_line_in_one_read() {
        let mut framer = LineFramer::new();
        let input = format!("{}\r\nPING :x\r\n", "a".repeat(MAX_LINE_LENGTH + 1));

        assert_eq!(framer.push(input.as_bytes()), vec!["PING :x"]);
        assert_eq!(framer.oversized_lines(), 1);
    }

    #[test]
    fn drops_oversized_line_across_reads() {
        let mut framer = LineFramer::new();

        assert!(framer.push("b".repeat(400).as_bytes()).is_empty());
        assert!(framer.push("b".repeat(400).as_bytes()).is_empty());
        assert_eq!(framer.oversized_lines(), 1);
        assert_eq!(framer.pending_len(), 0);

        assert!(framer.push("b".repeat(400).as_bytes()).is_empty());
        assert_eq!(framer.push(b"bbb\nNICK x\n"), vec!["NICK x"]);
        assert_eq!(framer.oversized_lines(), 1);
    }
}
