//! Folder navigation state for one browsing session.
//!
//! The navigator keeps a stack of folders whose bottom is always the served
//! root. Listings only ever look one level deep.

use mpcomm::{CommError, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct Navigator {
    root: PathBuf,
    stack: Vec<PathBuf>,
}

impl Navigator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            stack: vec![root.clone()],
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder at the top of the stack.
    pub fn current(&self) -> &Path {
        self.stack.last().map(PathBuf::as_path).unwrap_or(&self.root)
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn at_root(&self) -> bool {
        self.stack.len() == 1
    }

    /// Return to the root folder.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
    }

    /// Descend into `folder`, a single child name of the current folder.
    pub fn enter(&mut self, folder: &str) -> Result<&Path> {
        let mut components = Path::new(folder).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => {
                let next = self.current().join(name);
                self.stack.push(next);
                Ok(self.current())
            }
            _ => Err(CommError::Validation {
                field: "folder".to_string(),
                message: format!("{:?} is not a folder name", folder),
            }),
        }
    }

    /// Climb one level. Staying put at the root is not an error.
    pub fn up(&mut self) -> &Path {
        if !self.at_root() {
            self.stack.pop();
        }
        self.current()
    }

    /// Names of regular files in the current folder, sorted.
    pub fn files(&self) -> Vec<String> {
        list(self.current(), EntryKind::File)
    }

    /// Names of sub-folders of the current folder, sorted.
    pub fn dirs(&self) -> Vec<String> {
        list(self.current(), EntryKind::Dir)
    }
}

#[derive(Clone, Copy)]
enum EntryKind {
    File,
    Dir,
}

fn list(dir: &Path, kind: EntryKind) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| match kind {
            EntryKind::File => e.file_type().is_file(),
            EntryKind::Dir => e.file_type().is_dir(),
        })
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}
