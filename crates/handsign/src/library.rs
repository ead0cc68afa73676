//! The reference sign library.
//!
//! A library is a collection of labeled [`GestureSequence`] templates, recorded offline and loaded
//! once at startup. It is immutable after loading and is shared between threads with an [`Arc`]
//! without any locking.
//!
//! # On-disk formats
//!
//! Two layouts are supported by [`SignLibrary::load`]:
//!
//! * A single JSON *library document*:
//!   `{"signs": [{"label": "A", "templates": [[[0.1, ...], ...], ...]}, ...]}`. Signs are loaded
//!   in array order.
//! * A *library directory* containing one subdirectory per sign, named after its label. Each
//!   `.json` file in a sign's directory holds one template (`[[0.1, ...], ...]`). Signs and
//!   templates are loaded in lexicographic file name order.
//!
//! In both layouts, a template is a list of frames, and each frame is the list of its feature
//! values. Both round-trip frame order and feature values exactly.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::sequence::GestureSequence;

/// A labeled sign with one or more example recordings.
#[derive(Debug, Clone)]
pub struct ReferenceSign {
    label: Arc<str>,
    templates: Vec<GestureSequence>,
}

impl ReferenceSign {
    pub fn new(label: impl Into<Arc<str>>, templates: Vec<GestureSequence>) -> Self {
        Self {
            label: label.into(),
            templates,
        }
    }

    pub fn label(&self) -> &Arc<str> {
        &self.label
    }

    pub fn templates(&self) -> &[GestureSequence] {
        &self.templates
    }
}

#[derive(Serialize, Deserialize)]
struct LibraryDocument {
    signs: Vec<SignRecord>,
}

#[derive(Serialize, Deserialize)]
struct SignRecord {
    label: String,
    templates: Vec<GestureSequence>,
}

/// The in-memory collection of [`ReferenceSign`]s.
///
/// The order of signs is the order they were loaded in. The matcher relies on it to break ties
/// deterministically.
#[derive(Debug, Clone, Default)]
pub struct SignLibrary {
    signs: Vec<ReferenceSign>,
    dimension: Option<usize>,
}

impl SignLibrary {
    /// Creates a library without any signs. Matching against it always yields an unknown sign.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a library from in-memory signs.
    ///
    /// Signs that share a label are merged (keeping the position of the first one). Unusable
    /// templates and signs left without templates are dropped with a warning, the same as when
    /// loading from disk.
    pub fn from_signs<I: IntoIterator<Item = ReferenceSign>>(signs: I) -> Self {
        let mut merged: Vec<ReferenceSign> = Vec::new();
        for sign in signs {
            match merged.iter_mut().find(|s| s.label == sign.label) {
                Some(existing) => existing.templates.extend(sign.templates),
                None => merged.push(sign),
            }
        }

        let mut dimension = None;
        let mut signs = Vec::with_capacity(merged.len());
        for mut sign in merged {
            let total = sign.templates.len();
            sign.templates.retain(|template| {
                if !template.is_uniform() {
                    return false;
                }
                let Some(dim) = template.dimension() else {
                    return false;
                };
                *dimension.get_or_insert(dim) == dim
            });
            if sign.templates.len() != total {
                log::warn!(
                    "sign '{}': dropped {} of {} templates (empty, ragged, or feature width \
                     different from {:?})",
                    sign.label,
                    total - sign.templates.len(),
                    total,
                    dimension,
                );
            }
            if sign.templates.is_empty() {
                log::warn!("sign '{}' has no usable templates, excluding it", sign.label);
                continue;
            }
            signs.push(sign);
        }

        Self {
            signs,
            dimension,
        }
    }

    /// Loads a library document or library directory from `path`.
    ///
    /// Returns [`LibraryError::Empty`] if no sign with at least one usable template was found.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|e| LibraryError::io(path, e))?;
        let library = if meta.is_dir() {
            Self::load_dir(path)?
        } else {
            Self::load_document(path)?
        };

        if library.is_empty() {
            return Err(LibraryError::Empty);
        }
        log::info!(
            "loaded {} reference signs ({} templates, {} features per frame) from {}",
            library.len(),
            library.template_count(),
            library.dimension.unwrap_or(0),
            path.display(),
        );
        Ok(library)
    }

    fn load_document(path: &Path) -> Result<Self, LibraryError> {
        let file = File::open(path).map_err(|e| LibraryError::io(path, e))?;
        let doc: LibraryDocument = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| LibraryError::parse(path, e))?;
        Ok(Self::from_signs(doc.signs.into_iter().map(|record| {
            ReferenceSign::new(record.label, record.templates)
        })))
    }

    fn load_dir(root: &Path) -> Result<Self, LibraryError> {
        let mut signs = Vec::new();
        for sign_dir in sorted_entries(root)? {
            if !sign_dir.is_dir() {
                continue;
            }
            let Some(label) = sign_dir.file_name().and_then(|n| n.to_str()) else {
                log::warn!("skipping sign directory with non-UTF-8 name: {}", sign_dir.display());
                continue;
            };

            let mut templates = Vec::new();
            for file in sorted_entries(&sign_dir)? {
                if file.extension().map_or(true, |ext| ext != "json") {
                    continue;
                }
                match read_template(&file) {
                    Ok(template) => templates.push(template),
                    Err(e) => log::warn!("skipping template: {}", e),
                }
            }
            signs.push(ReferenceSign::new(label, templates));
        }
        Ok(Self::from_signs(signs))
    }

    /// Writes the library as a library document to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LibraryError> {
        let path = path.as_ref();
        let doc = LibraryDocument {
            signs: self
                .signs
                .iter()
                .map(|sign| SignRecord {
                    label: sign.label.to_string(),
                    templates: sign.templates.clone(),
                })
                .collect(),
        };
        let file = File::create(path).map_err(|e| LibraryError::Write {
            path: path.into(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &doc).map_err(|e| LibraryError::parse(path, e))?;
        writer.flush().map_err(|e| LibraryError::Write {
            path: path.into(),
            source: e,
        })
    }

    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }

    pub fn signs(&self) -> &[ReferenceSign] {
        &self.signs
    }

    pub fn labels(&self) -> impl Iterator<Item = &Arc<str>> + '_ {
        self.signs.iter().map(|s| &s.label)
    }

    pub fn template_count(&self) -> usize {
        self.signs.iter().map(|s| s.templates.len()).sum()
    }

    /// Returns the per-frame feature width shared by all templates, or `None` if the library is
    /// empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn get(&self, label: &str) -> Option<&ReferenceSign> {
        self.signs.iter().find(|s| &*s.label == label)
    }

    /// Returns the load-order index of the sign called `label`.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.signs.iter().position(|s| &*s.label == label)
    }

    pub fn label_at(&self, index: usize) -> Option<&Arc<str>> {
        self.signs.get(index).map(|s| &s.label)
    }

    /// Returns a summary line per sign, for logging and the CLI.
    pub fn describe(&self) -> String {
        self.signs
            .iter()
            .map(|s| {
                let lens = s.templates.iter().map(GestureSequence::len).join("/");
                format!("{} ({} templates, frames {})", s.label, s.templates.len(), lens)
            })
            .join("\n")
    }
}

/// Writes one template in the library directory layout: `<root>/<label>/<name>.json`.
pub fn write_template(
    root: impl AsRef<Path>,
    label: &str,
    name: &str,
    template: &GestureSequence,
) -> Result<PathBuf, LibraryError> {
    let dir = root.as_ref().join(label);
    fs::create_dir_all(&dir).map_err(|e| LibraryError::Write {
        path: dir.clone(),
        source: e,
    })?;
    let path = dir.join(format!("{name}.json"));
    let bytes = serde_json::to_vec(template).map_err(|e| LibraryError::parse(&path, e))?;
    fs::write(&path, bytes).map_err(|e| LibraryError::Write {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

fn read_template(path: &Path) -> Result<GestureSequence, LibraryError> {
    let file = File::open(path).map_err(|e| LibraryError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| LibraryError::parse(path, e))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, LibraryError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| LibraryError::io(dir, e))? {
        let entry = entry.map_err(|e| LibraryError::io(dir, e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}
