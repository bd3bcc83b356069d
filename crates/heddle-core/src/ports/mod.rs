//! Ports - 外部コンポーネントへのインターフェース
//!
//! 合意済みログ（replicated log）は外部サービスとして扱い、trait で抽象化する。
//! 開発・テスト用の単一ノード実装は `impls::LocalReplicatedLog`。

pub mod replicated_log;

pub use self::replicated_log::{Committed, LogError, ReplicatedLog};
