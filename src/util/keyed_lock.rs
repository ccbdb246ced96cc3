/// キー単位の非同期ロック（同一キーの処理を直列化する）。
use std::sync::{Arc, Mutex, PoisonError, Weak};

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<FxHashMap<String, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// `key` のロックを取得する。ガードを破棄すると解放される。
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.retain(|_, weak| weak.strong_count() > 0);
            if let Some(existing) = slots.get(key).and_then(Weak::upgrade) {
                existing
            } else {
                let fresh = Arc::new(AsyncMutex::new(()));
                slots.insert(key.to_string(), Arc::downgrade(&fresh));
                fresh
            }
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, weak| weak.strong_count() > 0);
        slots.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::default());
        let guard = locks.lock("youtube:cat").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("youtube:cat").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());

        // other keys are independent
        let _other = locks.lock("youtube:dog").await;

        drop(guard);
        contender.await.expect("contender completes");
    }

    #[tokio::test]
    async fn released_slots_are_pruned() {
        let locks = KeyedLocks::default();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.tracked_keys(), 2);
        }
        assert_eq!(locks.tracked_keys(), 0);
    }
}
