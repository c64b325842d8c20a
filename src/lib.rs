//! A Rust client for the SLIPO Workbench API.
//!
//! SLIPO integrates Point of Interest (POI) data as Linked Data. This crate
//! gives access to the four resource families of the API from one [`Client`]:
//! - the user's remote file system ([`Client::files`]),
//! - the resource catalog of RDF datasets ([`Client::catalog`]),
//! - data integration workflows ([`Client::processes`]),
//! - single SLIPO Toolkit operations: transform, interlink, fuse and enrich
//!   ([`Client::operations`]).
//!
//! Long-running processes and operations are followed with
//! [`Client::poll_until_terminal`], which can be abandoned through a
//! [`CancellationToken`].
//!
//! ## Quick start
//! - Generate an application key in the SLIPO Workbench.
//! - Configure it via environment variables (`SLIPO_URL`, `SLIPO_API_KEY`) or a
//!   `.slipoapirc` file (current directory or home directory), or pass it to
//!   [`Client::connect`].
//!
//! ```no_run
//! use slipo::{CancellationToken, Client, PollPolicy, TransformParameters};
//! use std::path::Path;
//!
//! fn main() -> slipo::Result<()> {
//!     let client = Client::from_env()?;
//!     client
//!         .files()
//!         .upload_file(Path::new("pois.csv"), "uploads/pois.csv", false)?;
//!
//!     let job = client
//!         .operations()
//!         .transform(TransformParameters::csv("uploads/pois.csv", "OSM"))?;
//!     let job = client.wait_for_operation(&job, PollPolicy::default(), &CancellationToken::new())?;
//!     if let Some(output) = &job.output {
//!         let rdf = client.processes().download_file(job.reference(), output.id)?;
//!         println!("{} bytes of N-Triples", rdf.len());
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod catalog;
mod client;
mod config;
mod download;
mod error;
mod filesystem;
mod operation;
mod poll;
mod process;
pub mod retry;
mod util;

pub use catalog::{Catalog, CatalogFilter, CatalogResource, Link, Page};
pub use client::{Client, ClientConfig, Credentials, DEFAULT_BASE_URL, Session};
pub use error::{Error, Result};
pub use filesystem::{DirectoryTree, FileEntry, FileSystem};
pub use operation::{
    DataFormat, DataSource, EnrichParameters, FuseParameters, InterlinkParameters, OperationJob,
    OperationKind, OperationParameters, Operations, Profiles, TransformConfiguration,
    TransformParameters,
};
pub use poll::{CancellationToken, PollPolicy, PollStep, Poller};
pub use process::{
    ExecutionFile, ExecutionFileType, ProcessDefinition, ProcessDescriptor, ProcessQuery,
    ProcessRef, Processes, Status, StepDefinition, StepDescriptor, StepInput,
};
pub use retry::RetryPolicy;
