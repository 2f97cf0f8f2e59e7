//! Terminal operator for interactive tag uploads

use crate::error::Result;
use crate::tag::{ConflictReport, Operator, Resolution};
use std::io::{BufRead, Write};

/// Prompts on a line-oriented input and prints to an output, normally
/// stdin and stdout.
pub struct TerminalOperator<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl TerminalOperator<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask until the answer parses. End of input counts as `default`.
    fn ask<T, P>(&mut self, question: &str, default: T, parse: P) -> Result<T>
    where
        P: Fn(&str) -> std::result::Result<T, String>,
    {
        loop {
            write!(self.output, "{} ", question)?;
            self.output.flush()?;

            let mut answer = String::new();
            if self.input.read_line(&mut answer)? == 0 {
                writeln!(self.output)?;
                return Ok(default);
            }
            match parse(answer.trim()) {
                Ok(value) => return Ok(value),
                Err(message) => writeln!(self.output, "{}", message)?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Operator for TerminalOperator<R, W> {
    fn notify(&mut self, message: &str) {
        if let Err(e) = writeln!(self.output, "{}", message) {
            log::warn!("Failed to write to terminal: {}", e);
        }
    }

    fn resolve_conflicts(&mut self, report: &ConflictReport) -> Result<Resolution> {
        writeln!(
            self.output,
            "⚠️  {} {} tag rows share an identifier with different tags",
            report.candidate_rows, report.entity
        )?;
        self.ask(
            "Resolve conflicting tag rows by taking (f)irst, (l)ast, (s)kip or (a)bort:",
            Resolution::Abort,
            Resolution::parse,
        )
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        self.ask(&format!("{} (y/n):", prompt), false, |answer| {
            match answer.to_lowercase().as_str() {
                "y" | "yes" => Ok(true),
                "n" | "no" => Ok(false),
                _ => Err(format!("Please answer y or n, not '{}'", answer)),
            }
        })
    }
}
