use crate::error::{FsContext, ModResult};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use walkdir::WalkDir;

pub struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn new(temp_root: &Path, label: &str) -> ModResult<Self> {
        fs::create_dir_all(temp_root).fs_context("create temp root")?;
        let name = format!("{}-{}", unique_stamp(), sanitize_label(label));
        Ok(Self {
            path: temp_root.join(name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_stamp() -> String {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos}-{counter}")
}

pub fn make_stage_dir(temp_root: &Path, label: &str) -> ModResult<StagingGuard> {
    let dir = temp_root.join(format!("stage-{}-{}", unique_stamp(), sanitize_label(label)));
    fs::create_dir_all(&dir).fs_context("create stage dir")?;
    Ok(StagingGuard::new(dir))
}

pub fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

// Falls back to a copy when the rename crosses filesystems.
pub fn commit_stage(mut stage: StagingGuard, dest: &Path) -> ModResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest).with_fs_context(|| format!("remove {}", dest.display()))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).fs_context("create target parent")?;
    }
    match fs::rename(stage.path(), dest) {
        Ok(()) => {
            stage.disarm();
            Ok(())
        }
        Err(_) => copy_dir(stage.path(), dest),
    }
}

pub fn copy_dir(source: &Path, dest: &Path) -> ModResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry
            .map_err(std::io::Error::from)
            .with_fs_context(|| format!("walk {}", source.display()))?;
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).fs_context("create dir")?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).fs_context("create file dir")?;
            }
            fs::copy(entry.path(), &target)
                .with_fs_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub fn relative_files(root: &Path) -> ModResult<Vec<String>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry
            .map_err(std::io::Error::from)
            .with_fs_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    Ok(files)
}

pub fn prune_empty_dirs(start: &Path, stop: &Path) -> usize {
    let mut removed = 0;
    let mut current = Some(start.to_path_buf());
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || fs::remove_dir(&dir).is_err() {
            break;
        }
        removed += 1;
        current = dir.parent().map(Path::to_path_buf);
    }
    removed
}
