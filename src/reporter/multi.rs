// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of ended scopes to several reporters.

use async_trait::async_trait;

use crate::metadata::ReportMetadata;

use super::Reporter;

/// A reporter that hands every chunk to several reporters at once.
///
/// Each reporter gets its own copy of the chunk. A failing reporter is logged
/// and does not keep the others from receiving the scope; the first failure
/// is returned once all of them are done.
#[derive(Debug, Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter + Send + Sync>>,
}

impl MultiReporter {
    /// Create a new MultiReporter from a set of reporters
    pub fn new(reporters: Vec<Box<dyn Reporter + Send + Sync>>) -> Self {
        MultiReporter { reporters }
    }

    /// Adds a reporter.
    pub fn with_reporter(mut self, r: impl Reporter + Send + Sync + 'static) -> MultiReporter {
        self.reporters.push(Box::new(r));
        self
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn report(
        &self,
        chunk: Vec<u8>,
        metadata: &ReportMetadata,
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        let results = futures::future::join_all(self.reporters.iter().enumerate().map(
            |(index, reporter)| {
                let chunk = chunk.clone();
                async move {
                    let result = reporter.report(chunk, metadata).await;
                    if let Err(err) = &result {
                        tracing::warn!(
                            ?err,
                            reporter = index,
                            scope_id = metadata.scope_id,
                            "reporter failed"
                        );
                    }
                    result
                }
            },
        ))
        .await;
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;

    use crate::{
        metadata::{ReportMetadata, DUMMY_METADATA},
        reporter::Reporter,
    };

    use super::MultiReporter;

    /// Records every chunk after a fixed delay, optionally failing.
    #[derive(Debug, Clone, Default)]
    struct Recorder {
        chunks: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        delay: Duration,
        fail: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[async_trait]
    impl Reporter for Recorder {
        async fn report(
            &self,
            chunk: Vec<u8>,
            metadata: &ReportMetadata,
        ) -> Result<(), Box<dyn std::error::Error + Send>> {
            tokio::time::sleep(self.delay).await;
            self.chunks
                .lock()
                .unwrap()
                .push((metadata.scope_id.to_owned(), chunk));
            if self.fail {
                Err(Box::new(DiskFull))
            } else {
                Ok(())
            }
        }
    }

    impl Recorder {
        fn recorded(&self) -> Vec<(String, Vec<u8>)> {
            self.chunks.lock().unwrap().clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_reporter_gets_the_chunk() {
        let recorders: Vec<Recorder> = (0..4)
            .map(|_| Recorder {
                delay: Duration::from_secs(1),
                ..Recorder::default()
            })
            .collect();
        let reporter = recorders
            .iter()
            .cloned()
            .fold(MultiReporter::default(), |multi, r| multi.with_reporter(r));
        // slow reporters run concurrently
        tokio::time::timeout(
            Duration::from_millis(1500),
            reporter.report(b"chunk".to_vec(), &DUMMY_METADATA),
        )
        .await
        .unwrap()
        .unwrap();
        for recorder in &recorders {
            assert_eq!(
                recorder.recorded(),
                vec![("dummy-scope".to_owned(), b"chunk".to_vec())]
            );
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_skip_other_reporters() {
        let before = Recorder::default();
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let after = Recorder::default();
        let reporter = MultiReporter::new(vec![
            Box::new(before.clone()) as Box<dyn Reporter + Send + Sync>,
            Box::new(failing.clone()) as Box<dyn Reporter + Send + Sync>,
            Box::new(after.clone()) as Box<dyn Reporter + Send + Sync>,
        ]);
        let err = reporter.report(vec![7], &DUMMY_METADATA).await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        for recorder in [before, failing, after] {
            assert_eq!(recorder.recorded().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_empty_multi_reporter() {
        MultiReporter::default()
            .report(vec![], &DUMMY_METADATA)
            .await
            .unwrap();
    }
}
