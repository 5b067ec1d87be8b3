//! 模块代码单元
//!
//! 代码单元是模块的隔离加载边界：提供资源查找、分发给Worker的构件列表和构件标识。
//! 宿主自身的构件（`excluded_artifacts`）永远不会被链接进代码单元。

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use batchhost_core::{HostError, HostResult};

/// 代码单元中的资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// 相对代码单元根的路径
    pub path: String,
    pub data: Vec<u8>,
}

/// 模块代码单元
pub trait CodeUnit: Send + Sync + Debug {
    /// 构件标识，内容变化时随之变化
    fn artifact_id(&self) -> &str;

    /// 代码单元在磁盘上的根目录
    fn root(&self) -> Option<&Path>;

    /// 查找文件名等于 `name` 的全部资源
    fn resources(&self, name: &str) -> HostResult<Vec<Resource>>;

    /// 分发给Worker的构件相对路径，按路径排序
    fn artifacts(&self) -> Vec<String>;

    fn read_artifact(&self, path: &str) -> HostResult<Vec<u8>>;
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// 磁盘目录形式的代码单元
#[derive(Debug, Clone)]
pub struct DirectoryCodeUnit {
    root: PathBuf,
    artifacts: Vec<String>,
    artifact_id: String,
}

impl DirectoryCodeUnit {
    /// 扫描目录，跳过名称在 `excluded_artifacts` 中的目录
    pub fn open(root: impl Into<PathBuf>, excluded_artifacts: &[String]) -> HostResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(HostError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("模块目录不存在: {}", root.display()),
            )));
        }

        let mut artifacts = Vec::new();
        let mut newest = 0u128;
        collect_files(&root, &root, excluded_artifacts, &mut artifacts, &mut newest)?;
        artifacts.sort();

        let artifact_id = format!("{}@{}", root.display(), newest);
        Ok(Self {
            root,
            artifacts,
            artifact_id,
        })
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    excluded_artifacts: &[String],
    artifacts: &mut Vec<String>,
    newest: &mut u128,
) -> HostResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if excluded_artifacts
                .iter()
                .any(|excluded| name.to_string_lossy() == excluded.as_str())
            {
                continue;
            }
            collect_files(root, &path, excluded_artifacts, artifacts, newest)?;
        } else if file_type.is_file() {
            let modified = entry
                .metadata()?
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|duration| duration.as_millis())
                .unwrap_or_default();
            *newest = (*newest).max(modified);

            if let Ok(relative) = path.strip_prefix(root) {
                let relative: Vec<String> = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy().into_owned())
                    .collect();
                artifacts.push(relative.join("/"));
            }
        }
    }
    Ok(())
}

impl CodeUnit for DirectoryCodeUnit {
    fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn resources(&self, name: &str) -> HostResult<Vec<Resource>> {
        self.artifacts
            .iter()
            .filter(|path| file_name(path) == name)
            .map(|path| -> HostResult<Resource> {
                Ok(Resource {
                    path: path.clone(),
                    data: fs::read(self.root.join(path))?,
                })
            })
            .collect()
    }

    fn artifacts(&self) -> Vec<String> {
        self.artifacts.clone()
    }

    fn read_artifact(&self, path: &str) -> HostResult<Vec<u8>> {
        if !self.artifacts.iter().any(|artifact| artifact == path) {
            return Err(HostError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("构件不存在: {path}"),
            )));
        }
        Ok(fs::read(self.root.join(path))?)
    }
}

/// 内存中的代码单元，用于宿主内置模块
#[derive(Debug, Clone, Default)]
pub struct MemoryCodeUnit {
    artifact_id: String,
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryCodeUnit {
    pub fn new(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), data.into());
        self
    }
}

impl CodeUnit for MemoryCodeUnit {
    fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    fn root(&self) -> Option<&Path> {
        None
    }

    fn resources(&self, name: &str) -> HostResult<Vec<Resource>> {
        Ok(self
            .files
            .iter()
            .filter(|(path, _)| file_name(path) == name)
            .map(|(path, data)| Resource {
                path: path.clone(),
                data: data.clone(),
            })
            .collect())
    }

    fn artifacts(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn read_artifact(&self, path: &str) -> HostResult<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            HostError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("构件不存在: {path}"),
            ))
        })
    }
}
