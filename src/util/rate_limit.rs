//! 外部生成サービス向けのトークンバケット。
//!
//! 実行は単一スレッドで逐次的に進むため、共有ロックは持たず `&mut self` で消費する。
use std::num::NonZeroU32;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_every: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// 空のバケットを作る。最初の呼び出しも `refill_every` だけ待つ。
    ///
    /// 呼び出しの前に必ず固定の待ち時間を置いていた従来の挙動と一致する。
    #[must_use]
    pub fn new(capacity: NonZeroU32, refill_every: Duration) -> Self {
        Self {
            capacity: f64::from(capacity.get()),
            tokens: 0.0,
            refill_every,
            last_refill: Instant::now(),
        }
    }

    /// 待ちなしで即時に通すバケット（テスト・ドライラン用）。
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            capacity: 1.0,
            tokens: 1.0,
            refill_every: Duration::ZERO,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_every.is_zero() {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let gained = elapsed.as_secs_f64() / self.refill_every.as_secs_f64();
        if gained > 0.0 {
            self.tokens = (self.tokens + gained).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// トークンを1つ取得する。足りなければ補充されるまで待つ。
    pub async fn acquire(&mut self) {
        loop {
            self.refill(Instant::now());
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let missing = 1.0 - self.tokens;
            let wait = self.refill_every.mul_f64(missing);
            sleep_until(self.last_refill + wait).await;
        }
    }

    /// 現在のトークン残量（補充後）。
    #[cfg(test)]
    fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }
}
