//! Fire event inventory.
//!
//! Walks a root folder organized as `<year>/<fire_name>/` and produces one
//! immutable [`FireRecord`] per fire, noting which required artifacts are
//! present and how large the fire's inputs are on disk. Burn severity is
//! shared per year under `<root>/severity/` (`mtbs_<region>_<year>.tif`
//! naming), with a per-fire severity file accepted as a fallback.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Identity of one fire event. Created at inventory time, never mutated;
/// jobs hold references to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireRecord {
    /// Fire name, unique within its year.
    pub name: String,
    pub year: i32,
    pub perimeter_present: bool,
    pub severity_present: bool,
    /// Total on-disk size of the fire's input folder.
    pub input_size_bytes: u64,
}

impl FireRecord {
    /// Stable identity key used for job records and report lookup.
    pub fn key(&self) -> String {
        format!("{}_{}", self.year, self.name)
    }
}

/// Enumerates fire events under a root folder.
pub struct FireCatalog {
    root: PathBuf,
}

impl FireCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Inventories every fire under the root, smallest inputs first.
    ///
    /// Year folders are directories with a numeric name; anything else at
    /// the top level (including the shared `severity` folder) is skipped,
    /// as are hidden fire folders.
    pub fn inventory(&self) -> Result<Vec<FireRecord>> {
        let mut records = Vec::new();

        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("cannot read fire root {}", self.root.display()))?;

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let year_name = entry.file_name().to_string_lossy().to_string();
            let Ok(year) = year_name.parse::<i32>() else {
                continue;
            };

            for fire_entry in std::fs::read_dir(entry.path())? {
                let fire_entry = fire_entry?;
                if !fire_entry.file_type()?.is_dir() {
                    continue;
                }
                let name = fire_entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                records.push(self.inspect_fire(year, &name, &fire_entry.path()));
            }
        }

        // Smallest fires first so early batch slots finish quickly; ties
        // break on the identity key to keep the order reproducible.
        records.sort_by(|a, b| {
            a.input_size_bytes
                .cmp(&b.input_size_bytes)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(records)
    }

    fn inspect_fire(&self, year: i32, name: &str, folder: &Path) -> FireRecord {
        let mut perimeter_present = false;
        let mut severity_present = false;
        let mut input_size_bytes = 0u64;

        for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                input_size_bytes += meta.len();
            }
            let file_name = entry.file_name().to_string_lossy().to_lowercase();
            if file_name.contains("burn_bndy") || file_name.contains("perimeter") {
                perimeter_present = true;
            }
            if file_name.contains("severity") {
                severity_present = true;
            }
        }

        if !severity_present {
            severity_present = self.shared_severity_exists(year);
        }

        FireRecord {
            name: name.to_string(),
            year,
            perimeter_present,
            severity_present,
            input_size_bytes,
        }
    }

    /// Checks `<root>/severity/` for an MTBS mosaic covering the year.
    fn shared_severity_exists(&self, year: i32) -> bool {
        let severity_dir = self.root.join("severity");
        let Ok(entries) = std::fs::read_dir(severity_dir) else {
            return false;
        };
        let year_tag = year.to_string();
        entries.filter_map(|e| e.ok()).any(|e| {
            let file_name = e.file_name().to_string_lossy().to_lowercase();
            file_name.starts_with("mtbs_") && file_name.contains(&year_tag)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Helper: builds `<root>/<year>/<fire>/` with the given files.
    fn add_fire(root: &Path, year: &str, fire: &str, files: &[(&str, usize)]) {
        let dir = root.join(year).join(fire);
        fs::create_dir_all(&dir).unwrap();
        for (name, size) in files {
            fs::write(dir.join(name), vec![0u8; *size]).unwrap();
        }
    }

    #[test]
    fn inventory_detects_artifacts_and_sizes() {
        let tmp = TempDir::new().unwrap();
        add_fire(
            tmp.path(),
            "2021",
            "caldor",
            &[
                ("ca_caldor_burn_bndy.shp", 400),
                ("dem.tif", 2000),
                ("dnbr.tif", 1600),
            ],
        );

        let records = FireCatalog::new(tmp.path()).inventory().unwrap();
        assert_eq!(records.len(), 1);
        let fire = &records[0];
        assert_eq!(fire.name, "caldor");
        assert_eq!(fire.year, 2021);
        assert!(fire.perimeter_present);
        assert!(!fire.severity_present);
        assert_eq!(fire.input_size_bytes, 4000);
        assert_eq!(fire.key(), "2021_caldor");
    }

    #[test]
    fn shared_severity_mosaic_counts_for_the_year() {
        let tmp = TempDir::new().unwrap();
        add_fire(tmp.path(), "2020", "creek", &[("perimeter.shp", 100)]);
        let severity = tmp.path().join("severity");
        fs::create_dir_all(&severity).unwrap();
        fs::write(severity.join("mtbs_CA_2020.tif"), b"tif").unwrap();

        let records = FireCatalog::new(tmp.path()).inventory().unwrap();
        assert!(records[0].severity_present);
    }

    #[test]
    fn severity_for_another_year_does_not_count() {
        let tmp = TempDir::new().unwrap();
        add_fire(tmp.path(), "2020", "creek", &[("perimeter.shp", 100)]);
        let severity = tmp.path().join("severity");
        fs::create_dir_all(&severity).unwrap();
        fs::write(severity.join("mtbs_CA_2019.tif"), b"tif").unwrap();

        let records = FireCatalog::new(tmp.path()).inventory().unwrap();
        assert!(!records[0].severity_present);
    }

    #[test]
    fn inventory_sorts_smallest_first() {
        let tmp = TempDir::new().unwrap();
        add_fire(tmp.path(), "2021", "dixie", &[("dem.tif", 9000)]);
        add_fire(tmp.path(), "2021", "antelope", &[("dem.tif", 500)]);
        add_fire(tmp.path(), "2020", "august", &[("dem.tif", 2500)]);

        let records = FireCatalog::new(tmp.path()).inventory().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["antelope", "august", "dixie"]);
    }

    #[test]
    fn non_year_folders_and_hidden_fires_are_skipped() {
        let tmp = TempDir::new().unwrap();
        add_fire(tmp.path(), "2021", "dixie", &[("dem.tif", 100)]);
        add_fire(tmp.path(), "notes", "scratch", &[("readme.txt", 10)]);
        add_fire(tmp.path(), "2021", ".staging", &[("dem.tif", 10)]);

        let records = FireCatalog::new(tmp.path()).inventory().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "dixie");
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = FireCatalog::new("/no/such/fire/root").inventory();
        assert!(result.is_err());
    }
}
