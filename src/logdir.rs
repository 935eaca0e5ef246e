// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Log directory purge with safety rules.
//!
//! A session truncates its log directories before the experiments start so
//! that every run leaves a self-consistent set of CSVs behind. The rules
//! below keep a mistyped config from emptying a system directory: the path
//! must be non-empty, mention `autotune`, and sit at least three components
//! deep. Only regular files at the top level are removed; subdirectories
//! (e.g. archived runs) are preserved.

use crate::error::{self, ErrorKind};

use log::*;

use std::fs;
use std::path::Path;

/// Check a directory against the purge safety rules
pub fn is_safe_log_dir<P: AsRef<Path>>(dir: P) -> bool {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return false;
    }
    if !dir.to_string_lossy().contains("autotune") {
        return false;
    }
    dir.components().count() >= 3
}

/// Remove top-level regular files of `dir`, creating it if absent.
/// Unsafe directories are refused with `ErrorKind::Config`.
pub fn purge<P: AsRef<Path>>(dir: P) -> error::Result<()> {
    let dir = dir.as_ref();
    if !is_safe_log_dir(dir) {
        Err(ErrorKind::Config(format!(
            "refusing to purge unsafe log directory '{}'",
            dir.display()
        )))?;
    }

    fs::create_dir_all(dir)?;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() {
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("Purge: cannot remove '{}': {}", entry.path().display(), e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_refuse_unsafe_dirs() {
        assert!(!is_safe_log_dir(""));
        assert!(!is_safe_log_dir("/"));
        assert!(!is_safe_log_dir("/var"));
        assert!(!is_safe_log_dir("/tmp/notes"));
        // deep enough but no "autotune" substring
        assert!(!is_safe_log_dir("/var/lib/fans/log"));
        // mentions autotune but too shallow
        assert!(!is_safe_log_dir("/autotune"));
    }

    #[test]
    fn test_accept_safe_dir() {
        assert!(is_safe_log_dir("/var/lib/autotune/log/session1"));
        assert!(is_safe_log_dir("/tmp/autotune/log"));
    }

    #[test]
    fn test_purge_refuses_unsafe() {
        assert!(purge("/var").is_err());
        assert!(purge("/tmp/notes").is_err());
    }

    #[test]
    fn test_purge_removes_files_keeps_subdirs() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("autotune").join("log").join("session1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("base_duty.csv"), "iter,duty,temp_trunc\n").unwrap();
        fs::write(dir.join("step.csv"), "t_index\n").unwrap();
        let archived = dir.join("archived");
        fs::create_dir(&archived).unwrap();
        fs::write(archived.join("old.csv"), "kept\n").unwrap();

        purge(&dir).expect("purge succeeds");

        assert!(!dir.join("base_duty.csv").exists());
        assert!(!dir.join("step.csv").exists());
        assert!(archived.exists());
        assert!(archived.join("old.csv").exists());
    }

    #[test]
    fn test_purge_creates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("autotune").join("log").join("fresh");
        assert!(!dir.exists());
        purge(&dir).expect("purge creates directory");
        assert!(dir.is_dir());
    }
}
