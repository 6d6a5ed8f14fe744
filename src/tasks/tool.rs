//! External command invocation.
//!
//! Tools are filters: the input is written to stdin and the result read from
//! stdout. A non-zero exit is a compile error carrying stderr verbatim.

use crate::build::TaskError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    program: String,
    args: Vec<String>,
}

impl ExternalTool {
    /// Build from a `[program, args...]` list. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self { program: program.clone(), args: args.to_vec() })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the tool with `input` on stdin and return its stdout.
    ///
    /// `file` names the source being processed in error messages; `cwd`
    /// lets tools resolve relative imports next to the source.
    pub fn run(&self, task: &str, file: &Path, input: &[u8], cwd: Option<&Path>) -> Result<Vec<u8>, TaskError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        tracing::debug!("'{}': {} {} < {}", task, self.program, self.args.join(" "), file.display());

        let mut child = command.spawn().map_err(|e| TaskError::io(task, &PathBuf::from(&self.program), e))?;

        let stdin = child.stdin.take();
        let output = thread::scope(|s| {
            // stdin is fed while stdout and stderr drain
            let writer = s.spawn(move || -> std::io::Result<()> {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(input)?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or(Ok(()));
            (output, written)
        });

        let (output, written) = output;
        let output = output.map_err(|e| TaskError::io(task, file, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {} while processing {}", self.program, output.status, file.display())
            } else {
                stderr
            };
            return Err(TaskError::compile(task, message));
        }

        // A tool may exit successfully without reading all of its input
        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(TaskError::io(task, file, e));
            }
        }

        Ok(output.stdout)
    }
}

/// Apply a chain of tools, feeding each one's stdout into the next.
pub fn run_chain(
    tools: &[ExternalTool],
    task: &str,
    file: &Path,
    input: Vec<u8>,
    cwd: Option<&Path>,
) -> Result<Vec<u8>, TaskError> {
    tools.iter().try_fold(input, |data, tool| tool.run(task, file, &data, cwd))
}
