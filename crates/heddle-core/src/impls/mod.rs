//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **LocalReplicatedLog**: 単一ノードの replicated log
//! - **EntryCodec**: ログエントリを pooled buffer にエンコード
//!
//! 本番では合意アルゴリズム側（外部）が `ReplicatedLog` を実装する。

pub mod codec;
pub mod local_log;

pub use self::codec::EntryCodec;
pub use self::local_log::{LocalLogConfig, LocalReplicatedLog};
