//! モデル定義
//!
//! tierflowで使用されるデータモデルを定義します。
//! 各モデルは機能ごとにモジュールに分離されています。

mod deployment;
mod endpoint;
mod host;
mod port;
mod service;
mod source;
mod volume;

// Re-exports
pub use deployment::*;
pub use endpoint::*;
pub use host::*;
pub use port::*;
pub use service::*;
pub use source::*;
pub use volume::*;
