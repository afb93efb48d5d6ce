#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Mission library: pre-staged missions on disk.
//!
//! Files matching `mission*.json` under the library directory each hold one
//! mission record or an array of them. The directory is the first existing
//! of `./serverDB`, `/tmp/nms/serverDB`, or `serverDB` next to the parent
//! of the running binary; an explicitly configured path must exist.

use nms_core::{validate, Error, Mission, Result, RoverId};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SEARCH_PATHS: &[&str] = &["serverDB", "/tmp/nms/serverDB"];

/// Disk-backed mission library.
#[derive(Debug, Clone)]
pub struct MissionLibrary {
    dir: Option<PathBuf>,
}

impl MissionLibrary {
    /// Resolve the library directory. An explicit path that does not exist
    /// is a start-up error; with no explicit path the standard locations
    /// are probed and an empty library is acceptable.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.is_dir() {
                return Err(Error::config(format!(
                    "mission library {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self {
                dir: Some(path.to_path_buf()),
            });
        }

        let mut candidates: Vec<PathBuf> = SEARCH_PATHS.iter().map(|p| PathBuf::from(*p)).collect();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
        {
            candidates.push(exe_dir.join("../serverDB"));
        }
        let dir = candidates.into_iter().find(|p| p.is_dir());
        if dir.is_none() {
            debug!("no mission library directory found; starting empty");
        }
        Ok(Self { dir })
    }

    /// Build a library rooted at a known directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Load all valid missions addressed to `rover_id`, ordered by mission
    /// id. Unreadable or invalid entries are logged and skipped; they never
    /// poison the rest of the library.
    pub fn load_for(&self, rover_id: &RoverId) -> Vec<Mission> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };

        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_mission_file(p))
                .collect(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read mission library");
                return Vec::new();
            }
        };
        files.sort();

        let mut missions = Vec::new();
        for file in files {
            match load_file(&file) {
                Ok(parsed) => {
                    missions.extend(parsed.into_iter().filter(|m| &m.rover_id == rover_id))
                }
                Err(e) => warn!(file = %file.display(), error = %e, "skipping mission file"),
            }
        }
        missions.sort_by(|a, b| a.mission_id.cmp(&b.mission_id));
        missions
    }
}

fn is_mission_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("mission") && n.ends_with(".json"))
}

/// Parse one library file holding a mission record or an array of them.
fn load_file(path: &Path) -> Result<Vec<Mission>> {
    let data = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&data)?;
    let records = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => {
            return Err(Error::validation(
                "mission file must hold an object or an array",
            ))
        }
    };

    let mut missions = Vec::with_capacity(records.len());
    for record in records {
        validate::validate_mission_value(&record)?;
        missions.push(serde_json::from_value::<Mission>(record)?);
    }
    Ok(missions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_mission(dir: &Path, file: &str, id: &str, rover: &str) {
        let body = format!(
            r#"{{"mission_id":"{id}","rover_id":"{rover}","geographic_area":{{"x1":0,"y1":0,"x2":10,"y2":10}},"task":"capture_images","duration_minutes":30}}"#
        );
        std::fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn loads_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_mission(dir.path(), "mission_b.json", "M03", "r1");
        write_mission(dir.path(), "mission_a.json", "M01", "r1");
        write_mission(dir.path(), "mission_c.json", "M02", "r2");
        // Not a mission file: ignored
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let lib = MissionLibrary::at(dir.path());
        let r1 = RoverId::new("r1").unwrap();
        let ids: Vec<_> = lib
            .load_for(&r1)
            .into_iter()
            .map(|m| m.mission_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["M01", "M03"]);
    }

    #[test]
    fn array_files_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"[
            {"mission_id":"M01","rover_id":"r1","geographic_area":{"x1":0,"y1":0,"x2":5,"y2":5},"task":"sample_collection","duration_minutes":10},
            {"mission_id":"M02","rover_id":"r1","geographic_area":{"x1":0,"y1":0,"x2":5,"y2":5},"task":"capture_images","duration_minutes":10}
        ]"#;
        std::fs::write(dir.path().join("mission_batch.json"), body).unwrap();
        // Wrong prefix: ignored even though it parses.
        std::fs::write(dir.path().join("batch.json"), body).unwrap();

        let lib = MissionLibrary::at(dir.path());
        let r1 = RoverId::new("r1").unwrap();
        assert_eq!(lib.load_for(&r1).len(), 2);
    }

    #[test]
    fn invalid_entries_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_mission(dir.path(), "mission_ok.json", "M01", "r1");
        std::fs::write(dir.path().join("mission_bad.json"), "not json").unwrap();
        std::fs::write(
            dir.path().join("mission_degenerate.json"),
            r#"{"mission_id":"M02","rover_id":"r1","geographic_area":{"x1":5,"y1":0,"x2":5,"y2":5},"task":"capture_images","duration_minutes":10}"#,
        )
        .unwrap();

        let lib = MissionLibrary::at(dir.path());
        let r1 = RoverId::new("r1").unwrap();
        let loaded = lib.load_for(&r1);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].mission_id.as_str(), "M01");
    }

    #[test]
    fn explicit_missing_path_is_a_startup_error() {
        assert!(MissionLibrary::discover(Some(Path::new("/definitely/not/here"))).is_err());
    }

    #[test]
    fn empty_library_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let lib = MissionLibrary::at(dir.path());
        assert!(lib.load_for(&RoverId::new("r1").unwrap()).is_empty());
    }
}
