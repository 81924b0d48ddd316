//! HashGenerator port - task hash 生成の抽象化
//!
//! # 実装
//! - **DigestHashGenerator**: `sha256(queue-payload-ulid)` の hex（本番用）
//!
//! ULID の乱数部分が discriminator になるため、同一 queue / payload /
//! 同一時刻でも hash は衝突しません（衝突確率は無視できる前提で、防御はしない）。

use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::domain::{TaskHash, TaskType};
use crate::ports::Clock;

/// HashGenerator は task ごとに一意な hash を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（store から共有して使う）
pub trait HashGenerator: Send + Sync {
    fn generate(&self, queue: &str, payload: &TaskType) -> TaskHash;
}

/// Clock ベースの ULID を discriminator にした SHA-256 hash 生成器
pub struct DigestHashGenerator<C> {
    clock: C,
}

impl<C: Clock> DigestHashGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> HashGenerator for DigestHashGenerator<C> {
    fn generate(&self, queue: &str, payload: &TaskType) -> TaskHash {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let discriminator = Ulid::from_parts(timestamp_ms, rand::random());
        let digest = Sha256::digest(format!("{queue}-{payload}-{discriminator}").as_bytes());
        TaskHash::new(hex::encode(digest))
    }
}
