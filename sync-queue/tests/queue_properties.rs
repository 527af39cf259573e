//! Property-based tests for the offline queue
//!
//! A random sequence of queue operations is checked against a simple model:
//! - waiting count == pending + failed items in the model
//! - pending batches come back in enqueue order
//! - an item is dead-lettered exactly on its fifth failure

use proptest::prelude::*;
use split_ledger::{ExpenseId, GroupId};
use std::collections::BTreeMap;
use sync_queue::{NewQueueItem, OfflineQueue, QueueConfig, QueueStatus};
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Step {
    Enqueue,
    Fail(usize),
    Done(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Enqueue),
        2 => any::<usize>().prop_map(Step::Fail),
        1 => any::<usize>().prop_map(Step::Done),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_queue_matches_model(steps in prop::collection::vec(step_strategy(), 1..60)) {
        let temp_dir = TempDir::new().unwrap();
        let queue = OfflineQueue::open(QueueConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..QueueConfig::default()
        })
        .unwrap();

        // local id -> (status, retries)
        let mut model: BTreeMap<u64, (QueueStatus, u32)> = BTreeMap::new();
        let mut last_id = 0u64;

        for step in steps {
            let waiting: Vec<u64> = model
                .iter()
                .filter(|(_, (status, _))| status.is_waiting())
                .map(|(id, _)| *id)
                .collect();

            match step {
                Step::Enqueue => {
                    let receipt = queue
                        .enqueue(NewQueueItem::delete_expense(ExpenseId::new(), GroupId::new()))
                        .unwrap();
                    prop_assert!(receipt.local_id > last_id);
                    last_id = receipt.local_id;
                    model.insert(receipt.local_id, (QueueStatus::Pending, 0));
                }
                Step::Fail(pick) if !waiting.is_empty() => {
                    let id = waiting[pick % waiting.len()];
                    queue.mark_syncing(id).unwrap();
                    let status = queue.mark_failed(id, "rejected").unwrap();

                    let entry = model.get_mut(&id).unwrap();
                    entry.1 += 1;
                    entry.0 = if entry.1 >= 5 { QueueStatus::DeadLetter } else { QueueStatus::Failed };
                    prop_assert_eq!(status, entry.0);
                }
                Step::Done(pick) if !waiting.is_empty() => {
                    let id = waiting[pick % waiting.len()];
                    queue.mark_syncing(id).unwrap();
                    queue.mark_done(id).unwrap();
                    model.remove(&id);
                    prop_assert!(queue.get(id).unwrap().is_none());
                }
                _ => {}
            }

            let expected: Vec<u64> = model
                .iter()
                .filter(|(_, (status, _))| status.is_waiting())
                .map(|(id, _)| *id)
                .collect();
            prop_assert_eq!(queue.pending_count().unwrap(), expected.len());

            let batch: Vec<u64> = queue.pending_batch(10).unwrap().iter().map(|i| i.local_id).collect();
            let head: Vec<u64> = expected.iter().take(10).copied().collect();
            prop_assert_eq!(batch, head);
        }

        let dead = queue.dead_letters().unwrap();
        prop_assert!(dead.iter().all(|item| item.retries == 5));
    }
}
