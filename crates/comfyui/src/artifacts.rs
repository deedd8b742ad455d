//! Artifact collection from the worker's output directory.
//!
//! After a run, every output declaration is matched against the file names
//! in the output area by prefix. Matches are read fully and base64-encoded.
//! A file that cannot be read is logged and skipped; only an absent output
//! area or an empty overall result fails the job.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use comfyq_core::job::{Artifact, ArtifactEncoding};
use comfyq_core::workflow::OutputDeclaration;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Output directory {} does not exist", .0.display())]
    OutputAreaMissing(PathBuf),

    #[error("Failed to list output directory {}: {source}", .path.display())]
    ListFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No output images found after workflow execution")]
    NoArtifacts,
}

/// Collect artifacts for `declarations` from `output_dir`.
///
/// Ordering follows the declarations, then directory iteration order
/// within a declaration (not guaranteed stable across filesystems).
pub async fn collect_artifacts(
    output_dir: &Path,
    declarations: &[OutputDeclaration],
) -> Result<Vec<Artifact>, CollectError> {
    match tokio::fs::metadata(output_dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(CollectError::OutputAreaMissing(output_dir.to_path_buf())),
    }

    let mut artifacts = Vec::new();

    for decl in declarations {
        tracing::info!(
            node_id = %decl.node_id,
            prefix = %decl.filename_prefix,
            "Looking for images with prefix",
        );

        let mut entries =
            tokio::fs::read_dir(output_dir)
                .await
                .map_err(|source| CollectError::ListFailed {
                    path: output_dir.to_path_buf(),
                    source,
                })?;

        let mut found = false;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(CollectError::ListFailed {
                        path: output_dir.to_path_buf(),
                        source,
                    })
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&decl.filename_prefix) {
                continue;
            }
            found = true;

            match tokio::fs::read(entry.path()).await {
                Ok(bytes) => {
                    tracing::info!(filename = %name, bytes = bytes.len(), "Found output image");
                    artifacts.push(Artifact {
                        filename: name,
                        encoding: ArtifactEncoding::Base64,
                        data: BASE64_STANDARD.encode(bytes),
                    });
                }
                Err(e) => {
                    tracing::warn!(filename = %name, error = %e, "Failed to read image file, skipping");
                }
            }
        }

        if !found {
            tracing::warn!(prefix = %decl.filename_prefix, "No images found with prefix");
        }
    }

    if artifacts.is_empty() {
        return Err(CollectError::NoArtifacts);
    }
    Ok(artifacts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
