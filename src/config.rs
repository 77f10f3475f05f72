//! 配置模块，负责加载JSON格式的搜索配置

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::compiler::{CompileOptions, DEFAULT_MAX_SUBQUERY_DEPTH};
use crate::condition::Visibility;
use crate::kind::ObjectKind;
use crate::sql_compiler::SqlCompiler;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 搜索配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// 逻辑表名到数据库表名的映射
    pub tables: HashMap<String, String>,
    /// 调用方未指定时默认查询的对象类型
    pub default_kind: ObjectKind,
    pub max_subquery_depth: usize,
    /// shared 条件可见的组，`None` 表示全部组
    pub visible_groups: Option<Vec<String>>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            default_kind: ObjectKind::Object,
            max_subquery_depth: DEFAULT_MAX_SUBQUERY_DEPTH,
            visible_groups: None,
        }
    }
}

impl SearchConfig {
    /// 从JSON文件加载配置，缺失的键使用默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::Missing(path_ref.to_path_buf()));
        }

        // 读取文件内容
        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        // 解析JSON
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    /// 创建使用配置中表映射的SQL编译器
    pub fn sql_compiler(&self) -> SqlCompiler {
        SqlCompiler::with_table_mapping(self.tables.clone())
    }

    pub fn visibility(&self) -> Visibility {
        match &self.visible_groups {
            Some(groups) => Visibility::groups(groups.iter().cloned()),
            None => Visibility::All,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            kind: self.default_kind,
            visibility: self.visibility(),
            max_subquery_depth: self.max_subquery_depth,
        }
    }
}
