//! Batch imports: link resolution and sequential execution.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use drivemedia_common::{ClientError, DriveId, DriveLink};

use crate::pipeline::{ImportPipeline, ImportResult};

/// Something that happened while resolving or running a batch.
#[derive(Debug)]
pub enum BatchEvent<'a> {
    /// An input line is neither a Drive link nor a file id.
    UnrecognizedLine { line: &'a str },
    /// A folder was expanded into `count` images.
    FolderListed { folder_id: &'a DriveId, count: usize },
    /// A folder holds no images.
    FolderEmpty { folder_id: &'a DriveId },
    /// A folder could not be listed.
    FolderFailed {
        folder_id: &'a DriveId,
        error: &'a ClientError,
    },
    /// An import is about to start.
    Started {
        file_id: &'a DriveId,
        index: usize,
        total: usize,
    },
    /// An import finished.
    Finished {
        file_id: &'a DriveId,
        index: usize,
        total: usize,
        result: &'a ImportResult,
    },
}

/// Observer of batch progress.
pub trait Progress {
    fn on_event(&mut self, event: BatchEvent<'_>);
}

impl<F> Progress for F
where
    F: FnMut(BatchEvent<'_>),
{
    fn on_event(&mut self, event: BatchEvent<'_>) {
        self(event)
    }
}

/// Progress observer that ignores every event.
pub struct Silent;

impl Progress for Silent {
    fn on_event(&mut self, _event: BatchEvent<'_>) {}
}

/// Result of one file in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub file_id: DriveId,
    #[serde(flatten)]
    pub result: ImportResult,
}

/// Results of a whole batch, in import order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    /// Number of files imported.
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_success()).count()
    }

    /// Number of files attempted.
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Entries that failed.
    pub fn failed(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| !e.result.is_success())
    }
}

/// Resolves user input into file ids and imports them one at a time.
pub struct BatchImporter {
    pipeline: Arc<ImportPipeline>,
}

impl BatchImporter {
    /// Create an importer around `pipeline`.
    pub fn new(pipeline: Arc<ImportPipeline>) -> Self {
        Self { pipeline }
    }

    /// Turn links, ids and folder links into file ids.
    ///
    /// Blank lines are ignored. Folders are expanded through their image
    /// listing; a failed or empty folder is reported and skipped. Ids come
    /// back in input order.
    pub async fn resolve<'l, I>(&self, lines: I, progress: &mut dyn Progress) -> Vec<DriveId>
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut ids = Vec::new();

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match DriveLink::parse(line) {
                Some(DriveLink::File(id)) => ids.push(id),
                Some(DriveLink::Folder(folder_id)) => {
                    match self.pipeline.drive().list_folder_images(&folder_id).await {
                        Ok(files) if files.is_empty() => {
                            debug!(folder_id = %folder_id, "Folder has no images");
                            progress.on_event(BatchEvent::FolderEmpty {
                                folder_id: &folder_id,
                            });
                        }
                        Ok(files) => {
                            progress.on_event(BatchEvent::FolderListed {
                                folder_id: &folder_id,
                                count: files.len(),
                            });
                            for file in files {
                                match DriveId::new(file.id) {
                                    Ok(id) => ids.push(id),
                                    Err(e) => warn!("Skipping listed file: {}", e),
                                }
                            }
                        }
                        Err(e) => {
                            warn!(folder_id = %folder_id, "Folder listing failed: {}", e);
                            progress.on_event(BatchEvent::FolderFailed {
                                folder_id: &folder_id,
                                error: &e,
                            });
                        }
                    }
                }
                None => progress.on_event(BatchEvent::UnrecognizedLine { line }),
            }
        }

        ids
    }

    /// Import every id in order, continuing past failures.
    pub async fn run(&self, ids: &[DriveId], progress: &mut dyn Progress) -> BatchReport {
        let total = ids.len();
        let mut report = BatchReport::default();

        for (index, file_id) in ids.iter().enumerate() {
            progress.on_event(BatchEvent::Started {
                file_id,
                index,
                total,
            });

            let result = self.pipeline.import_one(file_id).await;
            progress.on_event(BatchEvent::Finished {
                file_id,
                index,
                total,
                result: &result,
            });

            report.entries.push(BatchEntry {
                file_id: file_id.clone(),
                result,
            });
        }

        info!("Batch finished: {}/{} imported", report.succeeded(), report.total());
        report
    }
}
