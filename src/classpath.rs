use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_sarif::sarif::{Artifact, ArtifactLocation};
use tracing::warn;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::AnalysisError;
use crate::repository::ClassSource;
use crate::scan::dotted;

enum Root {
    Directory(PathBuf),
    Jar {
        path: PathBuf,
        archive: ZipArchive<File>,
    },
}

/// Ordered directory and jar roots; earlier roots shadow later ones.
pub(crate) struct Classpath {
    roots: Vec<Root>,
}

/// Split `:`-separated classpath values into entries.
pub(crate) fn split_classpath(values: &[String]) -> Vec<PathBuf> {
    values
        .iter()
        .flat_map(|value| value.split(':'))
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

impl Classpath {
    /// Open every entry; entries that do not exist are skipped with a warning.
    pub(crate) fn open(entries: &[PathBuf]) -> Result<Self> {
        let mut roots = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_dir() {
                roots.push(Root::Directory(entry.clone()));
            } else if entry.is_file() {
                let file = File::open(entry)
                    .with_context(|| format!("failed to open {}", entry.display()))?;
                let archive = ZipArchive::new(file)
                    .with_context(|| format!("failed to read {}", entry.display()))?;
                roots.push(Root::Jar {
                    path: entry.clone(),
                    archive,
                });
            } else {
                warn!(entry = %entry.display(), "classpath entry does not exist");
            }
        }
        Ok(Self { roots })
    }

    /// Sorted names of all classes whose dotted name starts with one of `prefixes`.
    pub(crate) fn class_names(&self, prefixes: &[String]) -> Result<Vec<String>> {
        let prefixes: Vec<String> = prefixes.iter().map(|prefix| dotted(prefix)).collect();
        let mut names = BTreeSet::new();
        for root in &self.roots {
            let mut found = Vec::new();
            match root {
                Root::Directory(path) => collect_dir(path, path, &mut found)?,
                Root::Jar { archive, .. } => {
                    found.extend(archive.file_names().filter_map(class_name));
                }
            }
            names.extend(found.into_iter().filter(|name| {
                prefixes.is_empty() || prefixes.iter().any(|prefix| name.starts_with(prefix))
            }));
        }
        Ok(names.into_iter().collect())
    }

    /// One SARIF artifact per root, in classpath order.
    pub(crate) fn artifacts(&self) -> Vec<Artifact> {
        self.roots
            .iter()
            .map(|root| {
                let path = match root {
                    Root::Directory(path) | Root::Jar { path, .. } => path,
                };
                let location = ArtifactLocation::builder()
                    .uri(path.to_string_lossy().to_string())
                    .build();
                Artifact::builder().location(location).build()
            })
            .collect()
    }
}

impl ClassSource for Classpath {
    fn read_class(&mut self, name: &str) -> Result<Option<Vec<u8>>, AnalysisError> {
        let relative = format!("{}.class", name.replace('.', "/"));
        for root in &mut self.roots {
            match root {
                Root::Directory(path) => {
                    let file = path.join(&relative);
                    if file.is_file() {
                        let data = fs::read(&file).map_err(|error| read_error(name, &file, error))?;
                        return Ok(Some(data));
                    }
                }
                Root::Jar { path, archive } => {
                    let mut entry = match archive.by_name(&relative) {
                        Ok(entry) => entry,
                        Err(ZipError::FileNotFound) => continue,
                        Err(error) => return Err(read_error(name, path, error)),
                    };
                    let mut data = Vec::new();
                    entry
                        .read_to_end(&mut data)
                        .map_err(|error| read_error(name, path, error))?;
                    return Ok(Some(data));
                }
            }
        }
        Ok(None)
    }
}

fn read_error(class: &str, path: &Path, error: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Read {
        class: class.to_string(),
        message: format!("{}: {error}", path.display()),
    }
}

fn collect_dir(root: &Path, path: &Path, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        let entry = entry.path();
        if entry.is_dir() {
            collect_dir(root, &entry, names)?;
        } else if let Ok(relative) = entry.strip_prefix(root) {
            let relative = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            names.extend(class_name(&relative));
        }
    }
    Ok(())
}

/// Dotted class name of a `.class` resource path, skipping module and package descriptors.
fn class_name(resource: &str) -> Option<String> {
    let stem = resource.strip_suffix(".class")?;
    if stem.ends_with("module-info") || stem.ends_with("package-info") {
        return None;
    }
    Some(dotted(stem))
}
