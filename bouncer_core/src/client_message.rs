/// Split one protocol line into its argument vector.
///
/// Words are separated by runs of spaces. A word starting with `:` begins the
/// trailing argument, which extends to the end of the line and may contain
/// spaces or be empty. A `:prefix` in first position is a message source and
/// is not part of the vector. Empty input produces an empty vector.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut rest = line.trim_start_matches(' ');

    if rest.starts_with(':') {
        rest = match rest.find(' ') {
            Some(offset) => rest[offset..].trim_start_matches(' '),
            None => "",
        };
    }

    while !rest.is_empty() {
        if let Some(trailing) = rest.strip_prefix(':') {
            args.push(trailing.to_string());
            break;
        }

        match rest.find(' ') {
            Some(offset) => {
                args.push(rest[..offset].to_string());
                rest = rest[offset..].trim_start_matches(' ');
            }
            None => {
                args.push(rest.to_string());
                break;
            }
        }
    }

    args
}

/// A tokenised, but not yet processed, line from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    /// The command, upper-cased
    pub command: String,
    /// The list of arguments, not including the command
    pub args: Vec<String>,
}

impl ClientMessage {
    /// Tokenise a received line. Returns `None` if it contains no command.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut args = tokenize(raw).into_iter();
        let command = args.next()?.to_ascii_uppercase();

        Some(Self {
            command,
            args: args.collect(),
        })
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Reassemble the message as a protocol line, without terminator. The last
    /// argument is always sent in trailing form if it needs to be.
    pub fn to_line(&self) -> String {
        let mut line = self.command.clone();
        let count = self.args.len();

        for (i, arg) in self.args.iter().enumerate() {
            line.push(' ');
            if i + 1 == count && (arg.is_empty() || arg.contains(' ') || arg.starts_with(':')) {
                line.push(':');
            }
            line.push_str(arg);
        }

        line
    }
}
