//! Project registry collaborator boundary. The core only needs to
//! answer "does this project exist" and "where is its working
//! directory"; everything else about project records lives elsewhere.

use std::path::{Path, PathBuf};

pub trait ProjectRegistry: Send + Sync {
    fn exists(&self, project_id: &str) -> bool;
    fn path(&self, project_id: &str) -> Option<PathBuf>;
}

/// Projects as immediate subdirectories of a root directory.
pub struct DirectoryProjects {
    root: PathBuf,
}

impl DirectoryProjects {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, project_id: &str) -> Option<PathBuf> {
        // Reject ids that could escape the root.
        if project_id.is_empty()
            || project_id.contains(['/', '\\'])
            || project_id.contains("..")
        {
            return None;
        }
        Some(self.root.join(project_id))
    }
}

impl ProjectRegistry for DirectoryProjects {
    fn exists(&self, project_id: &str) -> bool {
        self.resolve(project_id)
            .map(|p| p.is_dir())
            .unwrap_or(false)
    }

    fn path(&self, project_id: &str) -> Option<PathBuf> {
        self.resolve(project_id).filter(|p| p.is_dir())
    }
}

/// Convenience for tests and single-project setups: one fixed project.
pub struct SingleProject {
    pub id: String,
    pub path: PathBuf,
}

impl SingleProject {
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ProjectRegistry for SingleProject {
    fn exists(&self, project_id: &str) -> bool {
        project_id == self.id
    }

    fn path(&self, project_id: &str) -> Option<PathBuf> {
        (project_id == self.id).then(|| self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_projects_rejects_traversal() {
        let reg = DirectoryProjects::new("/srv/projects");
        assert!(!reg.exists("../etc"));
        assert!(!reg.exists("a/b"));
        assert!(!reg.exists(""));
        assert!(reg.path("..").is_none());
    }

    #[test]
    fn single_project_matches_only_its_id() {
        let reg = SingleProject::new("demo", "/tmp/demo");
        assert!(reg.exists("demo"));
        assert!(!reg.exists("other"));
        assert_eq!(reg.path("demo"), Some(PathBuf::from("/tmp/demo")));
    }
}
