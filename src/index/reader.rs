//! Source-corpus loading.
//!
//! Walks the documents directory and reads every supported file into
//! memory. The corpus is read-only input; nothing here writes to disk.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::core::errors::ApiError;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// One source document, identified by its path relative to the corpus root.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub text: String,
}

/// Reads all supported documents under `docs_dir`.
///
/// A missing directory is a configuration error: on a cold build there is
/// nothing to index and startup must fail.
pub fn load_documents(docs_dir: &Path) -> Result<Vec<SourceDocument>, ApiError> {
    if !docs_dir.is_dir() {
        return Err(ApiError::Config(format!(
            "source documents directory not found: {}",
            docs_dir.display()
        )));
    }

    let mut documents = Vec::new();

    for entry in WalkDir::new(docs_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ApiError::Retrieval(format!("failed to walk {}: {}", docs_dir.display(), e))
        })?;

        if !entry.file_type().is_file() || !is_supported(entry.path()) {
            continue;
        }

        let text = match fs::read_to_string(entry.path()) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Skipping unreadable document {}: {}", entry.path().display(), e);
                continue;
            }
        };

        if text.trim().is_empty() {
            continue;
        }

        let name = entry
            .path()
            .strip_prefix(docs_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();

        documents.push(SourceDocument { name, text });
    }

    Ok(documents)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
