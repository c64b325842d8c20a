//! POI data integration workflows tracked by the server.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::catalog::{Page, PagingOptions};
use crate::client::Client;
use crate::download::save_response;
use crate::error::{Error, Result};
use crate::operation::{DataSource, OperationKind};

/// Execution status of a process or operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Created,
    Running,
    Completed,
    Failed,
    Stopped,
    /// A status this client does not recognise. Never terminal.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "CREATED",
            Status::Running => "RUNNING",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Stopped => "STOPPED",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one revision of a process. Operations are tracked as processes too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessRef {
    pub id: i64,
    pub version: i64,
}

impl ProcessRef {
    pub fn new(id: i64, version: i64) -> Self {
        Self { id, version }
    }
}

impl From<(i64, i64)> for ProcessRef {
    fn from((id, version): (i64, i64)) -> Self {
        Self { id, version }
    }
}

impl From<&ProcessDescriptor> for ProcessRef {
    fn from(p: &ProcessDescriptor) -> Self {
        p.reference()
    }
}

impl fmt::Display for ProcessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process {} v{}", self.id, self.version)
    }
}

/// Kind of file attached to a process execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionFileType {
    Configuration,
    Input,
    Output,
    Sample,
    Kpi,
    Qa,
    Log,
    #[default]
    #[serde(other)]
    Other,
}

/// A file consumed or produced while executing a process step.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFile {
    pub id: i64,
    #[serde(default, rename = "type")]
    pub kind: ExecutionFileType,
    #[serde(default, alias = "fileName")]
    pub name: String,
    #[serde(default, alias = "fileSize")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    #[serde(default)]
    pub key: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "tool")]
    pub operation: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub files: Vec<ExecutionFile>,
}

/// Server-side view of a process revision. The client only observes it.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub id: i64,
    pub version: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub submitted_on: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_on: Option<DateTime<Utc>>,
}

impl ProcessDescriptor {
    pub fn reference(&self) -> ProcessRef {
        ProcessRef::new(self.id, self.version)
    }

    /// All execution files of the given type, in step order.
    pub fn files_of(&self, kind: ExecutionFileType) -> impl Iterator<Item = &ExecutionFile> {
        self.steps
            .iter()
            .flat_map(|s| s.files.iter())
            .filter(move |f| f.kind == kind)
    }
}

/// Input of a workflow step: an external dataset or the output of an earlier step.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum StepInput {
    Source(DataSource),
    Step {
        #[serde(rename = "stepKey")]
        step_key: u32,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub key: u32,
    pub name: String,
    pub operation: OperationKind,
    pub profile: String,
    pub inputs: Vec<StepInput>,
}

/// Definition of a new workflow.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Checks the definition before it is sent.
    ///
    /// Step keys must be unique and a step may only consume the output of a
    /// step declared before it, which also rules out cycles.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("process name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(Error::validation("process must have at least one step"));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.profile.trim().is_empty() {
                return Err(Error::validation(format!(
                    "step {} has no profile",
                    step.key
                )));
            }
            if step.inputs.is_empty() {
                return Err(Error::validation(format!("step {} has no input", step.key)));
            }
            for input in &step.inputs {
                match input {
                    StepInput::Source(source) => source.validate()?,
                    StepInput::Step { step_key } if !seen.contains(step_key) => {
                        return Err(Error::validation(format!(
                            "step {} consumes unknown or later step {}",
                            step.key, step_key
                        )));
                    }
                    StepInput::Step { .. } => {}
                }
            }
            if !seen.insert(step.key) {
                return Err(Error::validation(format!("duplicate step key {}", step.key)));
            }
        }
        Ok(())
    }
}

/// Filter for [`Processes::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessQuery {
    /// Only workflows whose name contains this term.
    pub term: Option<String>,
    pub page_index: u32,
    pub page_size: u32,
}

impl Default for ProcessQuery {
    fn default() -> Self {
        Self {
            term: None,
            page_index: 0,
            page_size: 10,
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    paging_options: PagingOptions,
    query: NameQuery<'a>,
}

#[derive(serde::Serialize)]
struct NameQuery<'a> {
    name: Option<&'a str>,
}

/// Workflow management namespace, see [`Client::processes`].
#[derive(Debug, Clone, Copy)]
pub struct Processes<'a> {
    client: &'a Client,
}

impl<'a> Processes<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub fn query(&self, query: &ProcessQuery) -> Result<Page<ProcessDescriptor>> {
        if query.page_size == 0 {
            return Err(Error::config("page size must be greater than zero"));
        }
        let body = QueryBody {
            paging_options: PagingOptions::new(query.page_index, query.page_size),
            query: NameQuery {
                name: query.term.as_deref(),
            },
        };
        self.client.post_json("process/", &body)
    }

    /// Registers a new workflow. The definition is validated locally first.
    pub fn create(&self, definition: &ProcessDefinition) -> Result<ProcessDescriptor> {
        definition.validate()?;
        let process: ProcessDescriptor = self.client.post_json("process/create", definition)?;
        tracing::info!(process = %process.reference(), name = %process.name, "process created");
        Ok(process)
    }

    /// Creates a new revision of a workflow by copying its most recent one.
    pub fn save(&self, process_id: i64) -> Result<ProcessDescriptor> {
        self.client
            .post_json(&format!("process/{}/save", process_id), &serde_json::json!({}))
    }

    pub fn status(&self, process: impl Into<ProcessRef>) -> Result<ProcessDescriptor> {
        let p = process.into();
        self.client
            .get_json(&format!("process/{}/{}/", p.id, p.version))
    }

    /// Starts or resumes execution.
    pub fn start(&self, process: impl Into<ProcessRef>) -> Result<ProcessDescriptor> {
        let p = process.into();
        tracing::info!(process = %p, "starting");
        self.client
            .post_json(&format!("process/{}/{}/start", p.id, p.version), &serde_json::json!({}))
    }

    /// Stops a running execution. This is the only way to cancel remote work.
    pub fn stop(&self, process: impl Into<ProcessRef>) -> Result<()> {
        let p = process.into();
        tracing::info!(process = %p, "stopping");
        let _: Option<serde_json::Value> = self
            .client
            .post_json(&format!("process/{}/{}/stop", p.id, p.version), &serde_json::json!({}))?;
        Ok(())
    }

    /// Execution files of a process revision.
    pub fn files(&self, process: impl Into<ProcessRef>) -> Result<Vec<ExecutionFile>> {
        let descriptor = self.status(process)?;
        Ok(descriptor
            .steps
            .into_iter()
            .flat_map(|s| s.files)
            .collect())
    }

    pub fn download_file(&self, process: impl Into<ProcessRef>, file_id: i64) -> Result<Vec<u8>> {
        let p = process.into();
        let url = self.file_url(p, file_id);
        let resp = self
            .client
            .execute(self.client.request(reqwest::Method::GET, &url), &url)?;
        let bytes = resp.bytes().map_err(|e| Error::transport(&url, e))?;
        Ok(bytes.to_vec())
    }

    pub fn download_file_to(
        &self,
        process: impl Into<ProcessRef>,
        file_id: i64,
        target: &Path,
    ) -> Result<PathBuf> {
        let p = process.into();
        let url = self.file_url(p, file_id);
        let resp = self
            .client
            .execute(self.client.request(reqwest::Method::GET, &url), &url)?;
        save_response(resp, &url, target, true, self.client.progress())
    }

    fn file_url(&self, p: ProcessRef, file_id: i64) -> String {
        self.client
            .endpoint(&format!("process/{}/{}/file/{}", p.id, p.version, file_id))
    }
}
