#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A fake download tool: a shell script in a private temp dir.
///
/// The scheduler invokes it as `/bin/sh <script> <target> <destination>`, so
/// inside the script `$1` is the workshop item and `$2` the directory the
/// artifact is expected in. Job working directories live next to the script
/// under [`ToolScript::work_root`].
pub struct ToolScript {
    dir: TempDir,
    script: PathBuf,
}

impl ToolScript {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create tool temp dir");
        let script = dir.path().join("tool.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write tool script");
        std::fs::create_dir_all(dir.path().join("jobs")).expect("create work root");
        Self { dir, script }
    }

    /// SteamCMD-like output ending in a downloaded artifact and exit 0.
    pub fn success() -> Self {
        Self::new(
            r#"
echo "Connecting anonymously to Steam Public...OK"
echo "Downloading item $1 ..."
for p in 10 25 50 75 100; do
  echo "progress: $p.00 (bytes)"
done
mkdir -p "$2"
echo data > "$2/item.bin"
echo "Success. Downloaded item $1 to \"$2\" (5 bytes)"
"#,
        )
    }

    /// Waits briefly so observers can attach, emits `lines` progress lines
    /// as fast as it can, then succeeds.
    pub fn chatty(lines: usize) -> Self {
        Self::new(&format!(
            r#"
sleep 0.3
i=1
while [ $i -le {lines} ]; do
  echo "Update state (0x61) downloading, progress: $i.00 ({lines})"
  i=$((i + 1))
done
mkdir -p "$2"
echo data > "$2/item.bin"
echo "Success. Downloaded item $1 to \"$2\" (5 bytes)"
"#
        ))
    }

    /// Prints a line, then blocks for `secs` seconds without producing output.
    pub fn sleeping(secs: u64) -> Self {
        Self::new(&format!(
            r#"
echo "Downloading item $1 ..."
echo "progress: 5.00 (bytes)"
exec sleep {secs}
"#
        ))
    }

    /// Downloads like [`success`](Self::success) but leaves a background
    /// process holding stdout open after it exits.
    pub fn leaves_child_running() -> Self {
        Self::new(
            r#"
echo "Downloading item $1 ..."
echo "progress: 50.00 (bytes)"
mkdir -p "$2"
echo data > "$2/item.bin"
echo "Success. Downloaded item $1 to \"$2\" (5 bytes)"
sleep 20 &
exit 0
"#,
        )
    }

    /// Prints `line` and exits with `code` without producing an artifact.
    pub fn failing(code: i32, line: &str) -> Self {
        Self::new(&format!("echo \"Downloading item $1 ...\"\necho \"{line}\"\nexit {code}"))
    }

    /// Exits 0 without creating the destination.
    pub fn no_artifact() -> Self {
        Self::new("echo \"Downloading item $1 ...\"\necho \"progress: 100.00 (bytes)\"\nexit 0")
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn work_root(&self) -> PathBuf {
        self.dir.path().join("jobs")
    }

    pub fn workdir_for(&self, job_id: impl std::fmt::Display) -> PathBuf {
        self.work_root().join(job_id.to_string())
    }
}
