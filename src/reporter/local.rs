// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A reporter that reports into a directory.

use async_trait::async_trait;
use chrono::SecondsFormat;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

use crate::metadata::ReportMetadata;

use super::Reporter;

/// Errors of the [`LocalReporter`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LocalReporterError {
    /// Writing the chunk failed.
    #[error("writing {}: {source}", path.display())]
    IoError {
        /// The file that could not be written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A reporter that reports into a directory.
///
/// Each chunk is written to its own file named
/// `yyyy-mm-ddTHH-MM-SSZ-t<thread id>-<scope id>.mlt`. Characters of the scope
/// id that are not safe in file names are replaced by `_`.
#[derive(Debug)]
pub struct LocalReporter {
    directory: PathBuf,
}

impl LocalReporter {
    /// Instantiate a new LocalReporter writing into the provided directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        LocalReporter {
            directory: directory.into(),
        }
    }

    /// Writes the chunk to disk.
    async fn report_scope(
        &self,
        chunk: Vec<u8>,
        metadata: &ReportMetadata<'_>,
    ) -> Result<(), LocalReporterError> {
        let time: chrono::DateTime<chrono::Utc> = SystemTime::now().into();
        let time = time
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .replace(":", "-");
        let file_name = format!(
            "{time}-t{}-{}.mlt",
            metadata.thread_id,
            sanitize(metadata.scope_id)
        );
        tracing::debug!(file_name = %file_name, bytes = chunk.len(), "reporting scope");
        let path = self.directory.join(file_name);
        tokio::fs::write(&path, chunk)
            .await
            .map_err(|source| LocalReporterError::IoError { path, source })
    }
}

fn sanitize(scope_id: &str) -> String {
    scope_id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl Reporter for LocalReporter {
    async fn report(
        &self,
        chunk: Vec<u8>,
        metadata: &ReportMetadata,
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        self.report_scope(chunk, metadata)
            .await
            .map_err(|e| Box::new(e) as _)
    }
}
