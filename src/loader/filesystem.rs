// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{Loader, LoaderSource, split_template_path};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Loader reading UTF-8 templates from one or more directories.
///
/// Directories are searched in order. Names use `/` as separator and may not
/// contain `..` segments. A loaded template is up to date while its file's
/// modification time is unchanged.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    search_path: Vec<PathBuf>,
}

impl FileSystemLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            search_path: vec![directory.into()],
        }
    }

    pub fn with_search_path<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_path: directories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(name.join("/"));
        }
    }
    Ok(())
}

impl Loader for FileSystemLoader {
    fn get_source(&self, _: &Environment, name: &str) -> Result<LoaderSource> {
        let segments = split_template_path(name)?;
        for directory in &self.search_path {
            let path: PathBuf = segments.iter().fold(directory.clone(), |p, s| p.join(s));
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                    continue;
                }
                Err(err) => return Err(TemplateError::io(name, &err)),
            };

            let mtime = modified(&path);
            let filename = path.display().to_string();
            log::trace!("Found template '{name}' at {filename}");
            return Ok(LoaderSource::new(source)
                .with_filename(filename)
                .with_uptodate(move || mtime.is_some() && modified(&path) == mtime));
        }
        Err(TemplateError::not_found(name))
    }

    fn list_templates(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for directory in &self.search_path {
            if directory.is_dir() {
                collect(directory, directory, &mut names)
                    .map_err(|e| TemplateError::io(directory.display().to_string(), &e))?;
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Namespace;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, source: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, source).unwrap();
    }

    #[test]
    fn test_loads_from_first_matching_directory() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(second.path(), "page.html", "second {{ x }}");
        write(second.path(), "layout/base.html", "base");

        let env = Environment::new();
        env.set_loader(FileSystemLoader::with_search_path([first.path(), second.path()]))
            .unwrap();
        let template = env.get_template("page.html", None, None).unwrap();
        assert_eq!(template.render([("x", 1)]).unwrap(), "second 1");
        assert!(template.filename().ends_with("page.html"));
        assert!(env.get_template("layout/base.html", None, None).is_ok());

        write(first.path(), "page.html", "first");
        env.clear_cache();
        let template = env.get_template("page.html", None, None).unwrap();
        assert_eq!(template.render(Namespace::new()).unwrap(), "first");
    }

    #[test]
    fn test_rejects_parent_segments() {
        let dir = TempDir::new().unwrap();
        let env = Environment::new();
        env.set_loader(FileSystemLoader::new(dir.path().join("sub"))).unwrap();
        write(dir.path(), "secret.txt", "secret");
        assert!(matches!(
            env.get_template("../secret.txt", None, None).unwrap_err(),
            TemplateError::TemplateNotFound { .. }
        ));
    }

    #[test]
    fn test_uptodate_tracks_file_removal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.html", "a");
        let env = Environment::new();
        env.set_loader(FileSystemLoader::new(dir.path())).unwrap();
        let template = env.get_template("a.html", None, None).unwrap();
        assert!(template.is_up_to_date());
        fs::remove_file(dir.path().join("a.html")).unwrap();
        assert!(!template.is_up_to_date());
        let cached = env.get_template("a.html", None, None);
        assert!(cached.is_err());
    }

    #[test]
    fn test_list_templates() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.html", "");
        write(dir.path(), "nested/a.html", "");
        let loader = FileSystemLoader::new(dir.path());
        assert_eq!(loader.list_templates().unwrap(), vec!["b.html", "nested/a.html"]);
    }
}
