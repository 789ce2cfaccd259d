use std::io::{self, Write};

use anyhow::Result;

/// Prints a growing message to stdout by writing only what was appended.
#[derive(Debug, Default)]
pub struct Transcript {
    printed: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `content` as the current message. If it no longer extends what
    /// was printed (an error replaced the partial answer) it starts on a
    /// fresh line.
    pub fn show(&mut self, content: &str) -> Result<()> {
        let mut out = io::stdout().lock();
        match content.strip_prefix(self.printed.as_str()) {
            Some(rest) => out.write_all(rest.as_bytes())?,
            None => {
                writeln!(out)?;
                out.write_all(content.as_bytes())?;
            }
        }
        out.flush()?;
        self.printed.clear();
        self.printed.push_str(content);
        Ok(())
    }

    /// End the current message.
    pub fn finish(&mut self) -> Result<()> {
        if !self.printed.is_empty() {
            println!();
        }
        self.printed.clear();
        Ok(())
    }
}
