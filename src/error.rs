use crate::tasks::TaskStatus;
use std::fmt;

/// 调度引擎的统一错误类型
#[derive(Debug)]
pub enum EngineError {
    /// 依赖图结构错误
    Graph(GraphError),
    /// 任务分配 / 进度上报错误
    Assignment(AssignmentError),
    /// 对外操作调用错误
    Operation(OperationError),
    /// 配置错误
    Config(ConfigError),
    /// 持久化错误
    Store(StoreError),
    /// IO 错误
    Io(std::io::Error),
}

/// 依赖图结构错误
#[derive(Debug)]
pub enum GraphError {
    /// 存在循环依赖，携带环上的任务 ID
    CircularDependency(Vec<String>),
}

/// 任务分配错误（只影响单次请求，调用方重新申请任务即可）
#[derive(Debug)]
pub enum AssignmentError {
    /// Agent 未注册
    UnknownAgent(String),
    /// 任务不存在
    TaskNotFound(String),
    /// 任务当前并未分配给该 Agent（包括租约过期后已被回收、再分配的情况）
    NotAssigned {
        task_id: String,
        agent_id: String,
        assigned_to: Option<String>,
    },
    /// 当前状态不允许该操作
    InvalidTransition { task_id: String, from: TaskStatus },
}

/// 对外操作调用错误
#[derive(Debug)]
pub enum OperationError {
    /// 操作未找到
    NotFound(String),
    /// 参数缺失
    MissingParameter(String),
    /// 参数类型或取值错误
    InvalidParameter { name: String, message: String },
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

/// 持久化错误
#[derive(Debug)]
pub enum StoreError {
    IoError(String),
    SerializationError(String),
}

// 实现 Display trait
impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Graph(e) => write!(f, "Graph Error: {}", e),
            EngineError::Assignment(e) => write!(f, "Assignment Error: {}", e),
            EngineError::Operation(e) => write!(f, "Operation Error: {}", e),
            EngineError::Config(e) => write!(f, "Config Error: {}", e),
            EngineError::Store(e) => write!(f, "Store Error: {}", e),
            EngineError::Io(e) => write!(f, "IO Error: {}", e),
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::CircularDependency(cycle) => {
                write!(f, "Circular dependency: {}", cycle.join(" -> "))
            }
        }
    }
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentError::UnknownAgent(id) => write!(f, "Agent '{}' is not registered", id),
            AssignmentError::TaskNotFound(id) => write!(f, "Task '{}' not found", id),
            AssignmentError::NotAssigned {
                task_id,
                agent_id,
                assigned_to,
            } => match assigned_to {
                Some(owner) => write!(
                    f,
                    "Task '{}' is not assigned to '{}' (held by '{}')",
                    task_id, agent_id, owner
                ),
                None => write!(f, "Task '{}' is not assigned to '{}'", task_id, agent_id),
            },
            AssignmentError::InvalidTransition { task_id, from } => {
                write!(f, "Task '{}' cannot change state from {}", task_id, from)
            }
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationError::NotFound(name) => write!(f, "Operation '{}' not found", name),
            OperationError::MissingParameter(name) => write!(f, "Missing parameter: {}", name),
            OperationError::InvalidParameter { name, message } => {
                write!(f, "Invalid parameter '{}': {}", name, message)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::IoError(msg) => write!(f, "IO error: {}", msg),
            StoreError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

// 实现 std::error::Error trait
impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for GraphError {}
impl std::error::Error for AssignmentError {}
impl std::error::Error for OperationError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for StoreError {}

// From 转换实现
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Store(StoreError::SerializationError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        EngineError::Graph(err)
    }
}

impl From<AssignmentError> for EngineError {
    fn from(err: AssignmentError) -> Self {
        EngineError::Assignment(err)
    }
}

impl From<OperationError> for EngineError {
    fn from(err: OperationError) -> Self {
        EngineError::Operation(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, EngineError>;
