//! `DiffBackend` implementation that shells out to a diff CLI with `--format json`.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};

use super::{DiffBackend, DiffParams, PageReply, StructureReply, decode_page_reply, decode_structure_reply};

/// Backend that invokes a diff binary as a subprocess.
///
/// The program must understand
/// `diff structure --type T --id I --left L --right R --format json` and
/// `diff nodes ... --offset O --limit N --format json`, printing the same
/// bodies the HTTP endpoints return.
pub struct CliBackend {
    program: PathBuf,
}

impl CliBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `<program> <args> --format json` and return stdout bytes.
    fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(args)
            .arg("--format")
            .arg("json")
            .output()
            .with_context(|| format!("Failed to run `{}`", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {} failed (exit {}): {}",
                self.program.display(),
                args.join(" "),
                output.status,
                stderr.trim()
            );
        }

        Ok(output.stdout)
    }
}

fn structure_args(params: &DiffParams) -> Vec<String> {
    vec![
        "diff".into(),
        "structure".into(),
        "--type".into(),
        params.entity_type.clone(),
        "--id".into(),
        params.entity_id.clone(),
        "--left".into(),
        params.left_time.to_string(),
        "--right".into(),
        params.right_time.to_string(),
    ]
}

fn node_args(params: &DiffParams, offset: usize, limit: usize) -> Vec<String> {
    let mut args = structure_args(params);
    args[1] = "nodes".into();
    args.extend([
        "--offset".into(),
        offset.to_string(),
        "--limit".into(),
        limit.to_string(),
    ]);
    args
}

impl DiffBackend for CliBackend {
    fn diff_structure(&self, params: &DiffParams) -> Result<StructureReply> {
        let stdout = self.run(&structure_args(params))?;
        decode_structure_reply(&stdout)
    }

    fn diff_node_page(
        &self,
        params: &DiffParams,
        offset: usize,
        limit: usize,
    ) -> Result<PageReply> {
        let stdout = self.run(&node_args(params, offset, limit))?;
        decode_page_reply(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DiffParams {
        DiffParams::new("Environment", "env-1", 1_000, 2_000)
    }

    #[test]
    fn test_structure_args() {
        assert_eq!(
            structure_args(&params()),
            [
                "diff", "structure", "--type", "Environment", "--id", "env-1", "--left", "1000",
                "--right", "2000"
            ]
        );
    }

    #[test]
    fn test_node_args() {
        let args = node_args(&params(), 500, 250);
        assert_eq!(args[..2], ["diff", "nodes"]);
        assert_eq!(args[args.len() - 4..], ["--offset", "500", "--limit", "250"]);
    }

    #[test]
    fn test_missing_program_is_error() {
        let backend = CliBackend::new("/nonexistent/envdiff-backend");
        let err = backend.diff_structure(&params()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to run"));
    }
}
