//! Source locations attached to rules.
//!
//! Every rule remembers where its text came from so that diagnostics (and the
//! merge audit trail) can quote the original line back to the user.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::rc::Rc;

use strum_macros::{AsRefStr, Display};

/// Where the text of a rule originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum InputKind {
    /// In-memory buffer handed to the library.
    Buffer,
    /// Single command line typed at the CLI.
    Cli,
    /// Ruleset piped through standard input.
    Stdin,
    /// Ruleset file on disk; lines are re-read on demand.
    File,
    /// Objects synthesized by the compiler itself.
    Internal,
    /// Objects dumped back from the kernel.
    Netlink,
}

/// Describes one input (file, buffer, ...) that rules were parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    pub kind: InputKind,
    // File path, or a label such as "<cmdline>"
    pub name: String,
    // Raw text for in-memory inputs
    pub data: Option<String>,
}

impl InputDescriptor {
    pub fn new(kind: InputKind, name: &str, data: Option<&str>) -> Self {
        InputDescriptor {
            kind,
            name: name.to_string(),
            data: data.map(|d| d.to_string()),
        }
    }

    pub fn internal() -> Rc<Self> {
        Rc::new(Self::new(InputKind::Internal, "internal", None))
    }

    /// Returns `true` if rules from this input have no printable source text.
    pub fn is_synthetic(&self) -> bool {
        matches!(self.kind, InputKind::Internal | InputKind::Netlink)
    }
}

/// Position of a rule inside its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub indesc: Rc<InputDescriptor>,
    // Byte offset of the start of the line within `indesc.data`
    pub line_offset: usize,
    // 1-based
    pub first_line: u32,
    pub first_column: u32,
    pub last_column: u32,
}

impl Location {
    pub fn new(indesc: &Rc<InputDescriptor>, line_offset: usize, first_line: u32) -> Self {
        Location {
            indesc: Rc::clone(indesc),
            line_offset,
            first_line,
            first_column: 1,
            last_column: 1,
        }
    }

    /// Location for objects with no source text.
    pub fn internal() -> Self {
        Location::new(&InputDescriptor::internal(), 0, 0)
    }

    pub fn with_columns(mut self, first_column: u32, last_column: u32) -> Self {
        self.first_column = first_column;
        self.last_column = last_column;
        self
    }

    /// Recovers the source line this location points to.
    ///
    /// Returns `None` for synthesized objects, or when a file input can no
    /// longer be read.
    pub fn source_line(&self) -> Option<String> {
        match self.indesc.kind {
            InputKind::Buffer | InputKind::Cli | InputKind::Stdin => {
                let data = self.indesc.data.as_deref()?;
                let line = data.get(self.line_offset..)?;
                Some(line.split('\n').next().unwrap_or_default().to_string())
            }
            InputKind::File => self.read_file_line(),
            InputKind::Internal | InputKind::Netlink => None,
        }
    }

    fn read_file_line(&self) -> Option<String> {
        if self.first_line == 0 {
            return None;
        }
        let file = match File::open(&self.indesc.name) {
            Ok(file) => file,
            Err(err) => {
                log::debug!("Cannot reopen {}: {}", self.indesc.name, err);
                return None;
            }
        };
        BufReader::new(file)
            .lines()
            .nth(self.first_line as usize - 1)
            .and_then(|line| line.ok())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}: ",
            self.indesc.name, self.first_line, self.first_column, self.last_column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_buffer_line_offset() {
        let text = "add rule ip x y tcp dport 22 accept\nadd rule ip x y tcp dport 23 accept\n";
        let indesc = Rc::new(InputDescriptor::new(InputKind::Buffer, "<buffer>", Some(text)));
        let second = Location::new(&indesc, text.find('\n').unwrap() + 1, 2);
        assert_eq!(
            second.source_line().as_deref(),
            Some("add rule ip x y tcp dport 23 accept")
        );
        let first = Location::new(&indesc, 0, 1);
        assert_eq!(
            first.source_line().as_deref(),
            Some("add rule ip x y tcp dport 22 accept")
        );
    }

    #[test]
    fn test_file_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "table ip x {{").unwrap();
        writeln!(file, "  chain y {{").unwrap();
        writeln!(file, "    ip saddr 1.1.1.1 accept").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let indesc = Rc::new(InputDescriptor::new(InputKind::File, &path, None));
        let loc = Location::new(&indesc, 0, 3);
        assert_eq!(loc.source_line().as_deref(), Some("    ip saddr 1.1.1.1 accept"));

        let past_end = Location::new(&indesc, 0, 10);
        assert!(past_end.source_line().is_none());
    }

    #[test]
    fn test_synthetic_has_no_line() {
        assert!(Location::internal().source_line().is_none());
        let netlink = Rc::new(InputDescriptor::new(InputKind::Netlink, "netlink", None));
        assert!(Location::new(&netlink, 0, 1).source_line().is_none());
        assert!(netlink.is_synthetic());
    }

    #[test]
    fn test_location_prefix() {
        let indesc = Rc::new(InputDescriptor::new(InputKind::File, "ruleset.nft", None));
        let loc = Location::new(&indesc, 0, 4).with_columns(3, 40);
        assert_eq!(loc.to_string(), "ruleset.nft:4:3-40: ");
    }
}
