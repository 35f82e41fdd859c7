//! File capabilities confined to a workspace directory.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};

use super::{str_param, Capability, CapabilitySchema, ParamKind, ParamSpec};
use crate::error::CapabilityError;

const MAX_LISTING: usize = 500;

/// Resolves capability paths inside a root directory.
///
/// Resolution is lexical: `..` may not climb above the root and absolute
/// paths must already lie under it. Symlinks are not followed.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, capability: &str, path: &str) -> Result<PathBuf, CapabilityError> {
        let requested = Path::new(path);
        let relative = if requested.is_absolute() {
            requested.strip_prefix(&self.root).map_err(|_| {
                CapabilityError::invalid_input(capability, format!("{} is outside the workspace", path))
            })?
        } else {
            requested
        };

        let mut resolved = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(CapabilityError::invalid_input(
                            capability,
                            format!("{} is outside the workspace", path),
                        ));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(CapabilityError::invalid_input(
                        capability,
                        format!("{} is outside the workspace", path),
                    ));
                }
            }
        }
        Ok(self.root.join(resolved))
    }
}

pub struct ReadFile {
    sandbox: Sandbox,
}

impl ReadFile {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Capability for ReadFile {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema::new("read_file", "Read a text file from the workspace.")
            .param(ParamSpec::required("path", ParamKind::String, "path relative to the workspace"))
    }

    async fn invoke(&self, input: &Map<String, Value>) -> Result<String, CapabilityError> {
        let path = str_param("read_file", input, "path")?;
        let full = self.sandbox.resolve("read_file", path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| CapabilityError::failed("read_file", format!("{}: {}", path, e)))
    }
}

pub struct WriteFile {
    sandbox: Sandbox,
}

impl WriteFile {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Capability for WriteFile {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema::new("write_file", "Write text to a file in the workspace.")
            .param(ParamSpec::required("path", ParamKind::String, "path relative to the workspace"))
            .param(ParamSpec::required("content", ParamKind::String, "text to write"))
            .param(ParamSpec::optional(
                "overwrite",
                ParamKind::Boolean,
                "replace an existing file, default false",
            ))
    }

    async fn invoke(&self, input: &Map<String, Value>) -> Result<String, CapabilityError> {
        let path = str_param("write_file", input, "path")?;
        let content = str_param("write_file", input, "content")?;
        let overwrite = input
            .get("overwrite")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let full = self.sandbox.resolve("write_file", path)?;

        if !overwrite && tokio::fs::try_exists(&full).await.unwrap_or(false) {
            return Err(CapabilityError::failed(
                "write_file",
                format!("{} already exists and overwrite is false", path),
            ));
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CapabilityError::failed("write_file", e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| CapabilityError::failed("write_file", format!("{}: {}", path, e)))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }
}

pub struct ListDirectory {
    sandbox: Sandbox,
}

impl ListDirectory {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Capability for ListDirectory {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema::new(
            "list_directory",
            "Recursively list files in a workspace directory.",
        )
        .param(ParamSpec::optional(
            "path",
            ParamKind::String,
            "directory relative to the workspace, default the workspace root",
        ))
    }

    async fn invoke(&self, input: &Map<String, Value>) -> Result<String, CapabilityError> {
        let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let base = self.sandbox.resolve("list_directory", path)?;

        let mut entries: Vec<String> = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| CapabilityError::failed("list_directory", format!("{}: {}", path, e)))?;
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| CapabilityError::failed("list_directory", e))?
            {
                let entry_path = entry.path();
                let display = entry_path
                    .strip_prefix(&base)
                    .unwrap_or(&entry_path)
                    .display()
                    .to_string();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    entries.push(format!("{}/", display));
                    pending.push(entry_path);
                } else {
                    entries.push(display);
                }
                if entries.len() >= MAX_LISTING {
                    break;
                }
            }
            if entries.len() >= MAX_LISTING {
                break;
            }
        }

        if entries.is_empty() {
            return Ok(format!("{} is empty", path));
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}
