//! Submission intake and validation.
//!
//! The chat front-end calls [`IngestPipeline::submit`] for each accepted
//! upload. Rejections happen here, before a task record exists: a rejected
//! submission never enters PENDING and never produces a notification.

use std::sync::atomic::Ordering;
use tracing::info;

use crate::db::NewTask;
use crate::error::{AdmissionError, Error, Result};
use crate::types::{Event, FileKind, TaskId};
use crate::utils::sanitize_file_name;

use super::IngestPipeline;

/// One user upload handed over by the front-end
#[derive(Clone, Debug)]
pub struct NewSubmission {
    /// Submitter identity
    pub submitter_id: i64,
    /// Chat the completion notification goes to
    pub chat_id: i64,
    /// File name as declared by the submitter
    pub file_name: String,
    /// Declared size in bytes, if the front-end knows it
    pub declared_size: Option<u64>,
    /// File kind; drives stage-0 routing
    pub kind: FileKind,
    /// Token the fetcher uses to retrieve the bytes
    pub remote_handle: String,
}

impl IngestPipeline {
    /// Accept a submission into the task store
    ///
    /// Validates the submission (size ceiling, submitter allowlist, usable
    /// filename) and inserts it in state PENDING, where a download worker
    /// will claim it. Returns the new task's id.
    ///
    /// # Errors
    ///
    /// [`Error::Admission`] when the submission is rejected,
    /// [`Error::ShuttingDown`] once shutdown has begun.
    pub async fn submit(&self, submission: NewSubmission) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let allowlist = &self.config.admission.admin_ids;
        if !allowlist.is_empty() && !allowlist.contains(&submission.submitter_id) {
            return Err(Error::Admission(AdmissionError::NotAuthorized {
                submitter_id: submission.submitter_id,
            }));
        }

        if let Some(declared) = submission.declared_size {
            let limit = self.config.admission.max_file_size;
            if declared > limit {
                return Err(Error::Admission(AdmissionError::TooLarge { declared, limit }));
            }
        }

        let file_name =
            sanitize_file_name(&submission.file_name).ok_or(AdmissionError::InvalidName)?;

        let id = self
            .db
            .insert_task(&NewTask {
                submitter_id: submission.submitter_id,
                chat_id: submission.chat_id,
                file_name: file_name.clone(),
                declared_size: submission.declared_size,
                kind: submission.kind,
                remote_handle: submission.remote_handle,
            })
            .await?;

        info!(
            task_id = id.0,
            submitter_id = submission.submitter_id,
            file_name,
            kind = %submission.kind,
            "submission accepted"
        );

        self.emit_event(Event::TaskQueued {
            id,
            file_name,
            kind: submission.kind,
        });

        Ok(id)
    }
}
