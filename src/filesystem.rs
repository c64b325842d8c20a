//! The user's remote file system.
//!
//! The server enforces upload size limits (20 MB by default), a space quota
//! (5 GB by default) and at most 5 levels of directory nesting.

use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::blocking::multipart::{Form, Part};
use std::path::{Path, PathBuf};

use crate::client::Client;
use crate::download::save_response;
use crate::error::{Error, Result};
use crate::util::{normalize_remote_path, split_remote_path};

/// A file or directory on the remote file system, as seen at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the user's root, without a leading `/`.
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl FileEntry {
    pub fn name(&self) -> &str {
        split_remote_path(&self.path).1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default, alias = "modifiedOn", with = "chrono::serde::ts_milliseconds_option")]
    modified: Option<DateTime<Utc>>,
}

/// A directory and everything below it, as returned by [`FileSystem::browse`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryTree {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default, alias = "modifiedOn", with = "chrono::serde::ts_milliseconds_option")]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    folders: Vec<DirectoryTree>,
    #[serde(default)]
    files: Vec<RemoteFile>,
}

impl DirectoryTree {
    /// Finds the directory at a normalized path; `""` is the root.
    fn directory(&self, path: &str) -> Option<&DirectoryTree> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('/') {
            current = current.folders.iter().find(|f| f.name == segment)?;
        }
        Some(current)
    }

    /// Entries directly inside the directory at `path`: folders first, then files.
    ///
    /// A path naming a file yields that single entry.
    pub fn entries(&self, path: &str) -> Option<Vec<FileEntry>> {
        let path = normalize_remote_path(path);
        if let Some(dir) = self.directory(&path) {
            let child = |name: &str| {
                if path.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", path, name)
                }
            };
            let folders = dir.folders.iter().map(|f| FileEntry {
                path: child(&f.name),
                size: f.size,
                modified: f.modified,
                is_dir: true,
            });
            let files = dir.files.iter().map(|f| FileEntry {
                path: child(&f.name),
                size: f.size,
                modified: f.modified,
                is_dir: false,
            });
            return Some(folders.chain(files).collect());
        }

        let (parent, name) = split_remote_path(&path);
        let dir = self.directory(parent)?;
        dir.files.iter().find(|f| f.name == name).map(|f| {
            vec![FileEntry {
                path: path.clone(),
                size: f.size,
                modified: f.modified,
                is_dir: false,
            }]
        })
    }

    /// The entry at `path`, file or directory.
    pub fn entry(&self, path: &str) -> Option<FileEntry> {
        let path = normalize_remote_path(path);
        let (parent, name) = split_remote_path(&path);
        if name.is_empty() {
            return Some(FileEntry {
                path,
                size: self.size,
                modified: self.modified,
                is_dir: true,
            });
        }
        self.entries(parent)?.into_iter().find(|e| e.path == path)
    }
}

#[derive(serde::Serialize)]
struct UploadData<'a> {
    path: &'a str,
    filename: &'a str,
    overwrite: bool,
}

/// File system namespace, see [`Client::files`].
#[derive(Debug, Clone, Copy)]
pub struct FileSystem<'a> {
    client: &'a Client,
}

impl<'a> FileSystem<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// All files and folders of the user.
    pub fn browse(&self) -> Result<DirectoryTree> {
        self.client.get_json("file-system/")
    }

    /// Lists a directory. Fails with [`Error::NotFound`] if it does not exist.
    pub fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.browse()?
            .entries(path)
            .ok_or_else(|| Error::not_found(format!("remote path {} does not exist", path)))
    }

    /// Uploads `content` to `path`, failing if the file already exists.
    pub fn upload(&self, path: &str, content: impl Into<Vec<u8>>) -> Result<FileEntry> {
        self.upload_with(path, content, false)
    }

    /// Uploads `content` to `path`. Missing directories are created by the server.
    pub fn upload_with(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
        overwrite: bool,
    ) -> Result<FileEntry> {
        let target = normalize_remote_path(path);
        let (dir, filename) = split_remote_path(&target);
        if filename.is_empty() {
            return Err(Error::validation(format!(
                "upload target `{}` has no file name",
                path
            )));
        }

        let content = content.into();
        let size = content.len() as u64;
        let url = self.client.endpoint("file-system/upload/");
        let data = serde_json::to_string(&UploadData {
            path: dir,
            filename,
            overwrite,
        })
        .map_err(|e| Error::validation(format!("cannot encode upload request: {}", e)))?;

        let form = Form::new()
            .part(
                "data",
                Part::text(data)
                    .mime_str("application/json")
                    .map_err(|e| Error::transport(&url, e))?,
            )
            .part(
                "file",
                Part::bytes(content)
                    .file_name(filename.to_string())
                    .mime_str("application/octet-stream")
                    .map_err(|e| Error::transport(&url, e))?,
            );

        tracing::debug!(path = %target, size, "uploading");
        let resp = self
            .client
            .execute(self.client.request(Method::POST, &url).multipart(form), &url)?;
        let result: Option<serde_json::Value> = self.client.read_json(resp, &url)?;

        // The server answers with the refreshed tree; fall back to what was sent.
        let tree = result.and_then(|v| serde_json::from_value::<DirectoryTree>(v).ok());
        Ok(tree.and_then(|t| t.entry(&target)).unwrap_or(FileEntry {
            path: target,
            size,
            modified: None,
            is_dir: false,
        }))
    }

    /// Uploads a local file.
    pub fn upload_file(&self, source: &Path, target: &str, overwrite: bool) -> Result<FileEntry> {
        let content = std::fs::read(source).map_err(|e| Error::io(source, e))?;
        self.upload_with(target, content, overwrite)
    }

    /// Downloads a remote file into memory.
    pub fn download(&self, path: &str) -> Result<Vec<u8>> {
        let (url, resp) = self.get_file(path)?;
        let bytes = resp.bytes().map_err(|e| Error::transport(&url, e))?;
        Ok(bytes.to_vec())
    }

    /// Downloads a remote file into `target`.
    ///
    /// Refuses to replace an existing file unless `overwrite` is set and never
    /// writes over a directory.
    pub fn download_to(&self, path: &str, target: &Path, overwrite: bool) -> Result<PathBuf> {
        if target.is_dir() {
            return Err(Error::io(
                target,
                std::io::Error::new(std::io::ErrorKind::IsADirectory, "target is a directory"),
            ));
        }
        if target.exists() && !overwrite {
            return Err(Error::io(
                target,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file already exists"),
            ));
        }
        let (url, resp) = self.get_file(path)?;
        save_response(resp, &url, target, overwrite, self.client.progress())
    }

    fn get_file(&self, path: &str) -> Result<(String, reqwest::blocking::Response)> {
        let source = normalize_remote_path(path);
        if source.is_empty() {
            return Err(Error::validation("download path must name a file"));
        }
        let url = self.client.endpoint("file-system/");
        let req = self
            .client
            .request(Method::GET, &url)
            .query(&[("path", source.as_str())]);
        let resp = self.client.execute(req, &url)?;
        Ok((url, resp))
    }
}
