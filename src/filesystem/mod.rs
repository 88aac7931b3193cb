// 本地文件与媒体库模块
//
// 上传引擎通过这里读取源文件、暂存临时副本，并在上传成功后清理

mod library;
mod service;
mod types;

pub use library::{FsMediaLibrary, MediaLibrary};
pub use service::{uri_to_path, FsStorage, LocalStorage};
pub use types::*;
