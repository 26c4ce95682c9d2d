//! Atomic per-run artifact writes under `runs/<run_id>/` (§4.12, §6).
//! Each write lands via a temp file + rename so a crash never leaves a
//! half-written artifact visible to readers.

use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactType {
    Bars,
    DebugSearch,
    Plot,
    ResultSummary,
    ExpressionMap,
}

impl ArtifactType {
    fn dir(&self) -> &'static str {
        match self {
            ArtifactType::Bars => "data",
            ArtifactType::DebugSearch => "debug",
            ArtifactType::Plot => "plots",
            ArtifactType::ResultSummary => ".",
            ArtifactType::ExpressionMap => "exports",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Bars => "bars",
            ArtifactType::DebugSearch => "debug_search",
            ArtifactType::Plot => "plot",
            ArtifactType::ResultSummary => "result_summary",
            ArtifactType::ExpressionMap => "expression_map",
        }
    }
}

pub struct ArtifactWriter {
    run_dir: PathBuf,
    index: Vec<(ArtifactType, PathBuf)>,
}

impl ArtifactWriter {
    pub fn new(runs_root: impl AsRef<Path>, run_id: &str) -> std::io::Result<Self> {
        let run_dir = runs_root.as_ref().join(run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self { run_dir, index: Vec::new() })
    }

    /// Writes `bytes` to `<run_dir>/<kind.dir()>/<name>` atomically and
    /// records it in the in-memory durable index.
    pub fn write(&mut self, kind: ArtifactType, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let dir = self.run_dir.join(kind.dir());
        std::fs::create_dir_all(&dir)?;
        let final_path = dir.join(name);
        let tmp_path = dir.join(format!("{name}.tmp"));

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &final_path)?;

        self.index.push((kind, final_path.clone()));
        Ok(final_path)
    }

    pub fn index(&self) -> &[(ArtifactType, PathBuf)] {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_leaves_no_tmp_file_behind() {
        let dir = std::env::temp_dir().join(format!("discovery-artifacts-test-{}", std::process::id()));
        let mut writer = ArtifactWriter::new(&dir, "run-1").unwrap();
        let path = writer.write(ArtifactType::ResultSummary, "result_summary.json", b"{}").unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(writer.index().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
