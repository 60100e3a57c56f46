//! IdGenerator port - RecordId 生成の抽象化
//!
//! # 実装
//! - **UuidRecordIdGenerator**: Clock の millis + UUID v4

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::RecordId;
use crate::ports::Clock;

/// RecordIdGenerator は時刻でソート可能な RecordId を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（producer と worker の両方から使える）
pub trait RecordIdGenerator: Send + Sync {
    fn generate(&self) -> RecordId;
}

/// Clock を使って `<millis>_<uuid>` を生成します。
/// テスト時に FixedClock を渡すと millis 部分が決定的になります。
pub struct UuidRecordIdGenerator {
    clock: Arc<dyn Clock>,
}

impl UuidRecordIdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl RecordIdGenerator for UuidRecordIdGenerator {
    fn generate(&self) -> RecordId {
        RecordId::from_parts(self.clock.now(), Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UuidRecordIdGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.generate();
        let id2 = id_gen.generate();
        let id3 = id_gen.generate();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn fixed_clock_pins_the_millis_prefix() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UuidRecordIdGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        // FixedClock でも UUID 部分があるので ID は異なる
        assert_ne!(id1, id2);

        // ただし millis 部分は同じ
        assert_eq!(id1.created_millis(), id2.created_millis());
        assert_eq!(id1.created_millis(), fixed_time.timestamp_millis() as u64);
    }
}
