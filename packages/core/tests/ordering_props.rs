use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use queue_core::{PipelineEntry, PipelineId, PipelineQueue, Priority, QueueId};

fn at(offset_secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs)
}

#[derive(Debug, Clone)]
enum Op {
    Push { id: u64, priority: i64 },
    Promote,
    PopOut { id: u64 },
    Complete { id: u64 },
    Reprioritize { id: u64, priority: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..20, -5i64..5).prop_map(|(id, priority)| Op::Push { id, priority }),
        Just(Op::Promote),
        (0u64..20).prop_map(|id| Op::PopOut { id }),
        (0u64..20).prop_map(|id| Op::Complete { id }),
        (0u64..20, -5i64..5).prop_map(|(id, priority)| Op::Reprioritize { id, priority }),
    ]
}

proptest! {
    #[test]
    fn distinct_priorities_promote_in_descending_order(
        priorities in proptest::collection::hash_set(-1000i64..1000, 1..30)
    ) {
        let mut queue = PipelineQueue::new(QueueId(1), usize::MAX);
        for (i, priority) in priorities.iter().enumerate() {
            let entry = PipelineEntry::new(i as u64, *priority).with_enqueued_at(at(i as i64));
            prop_assert!(queue.push(entry).is_ok());
        }

        let promoted: Vec<Priority> = queue.promote().into_iter().map(|e| e.priority).collect();
        prop_assert_eq!(promoted.len(), priorities.len());
        prop_assert!(promoted.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn equal_priorities_promote_in_enqueue_order(
        offsets in proptest::collection::hash_set(0i64..100_000, 1..30),
        priority in -10i64..10,
    ) {
        let mut queue = PipelineQueue::new(QueueId(1), usize::MAX);
        for (i, offset) in offsets.iter().enumerate() {
            let entry = PipelineEntry::new(i as u64, priority).with_enqueued_at(at(*offset));
            prop_assert!(queue.push(entry).is_ok());
        }

        let times: Vec<DateTime<Utc>> =
            queue.promote().into_iter().map(|e| e.enqueued_at).collect();
        prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn running_never_exceeds_limit(
        limit in 0usize..4,
        ops in proptest::collection::vec(op(), 0..80),
    ) {
        let mut queue = PipelineQueue::new(QueueId(1), limit);
        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Push { id, priority } => {
                    let entry = PipelineEntry::new(id, priority).with_enqueued_at(at(step as i64));
                    let duplicate = queue.contains(PipelineId(id));
                    prop_assert_eq!(queue.push(entry).is_err(), duplicate);
                }
                Op::Promote => {
                    queue.promote();
                }
                Op::PopOut { id } => {
                    queue.pop_out(PipelineId(id));
                    prop_assert!(!queue.contains(PipelineId(id)));
                }
                Op::Complete { id } => {
                    queue.complete(PipelineId(id));
                }
                Op::Reprioritize { id, priority } => {
                    queue.update_priority(PipelineId(id), Priority(priority));
                }
            }
            prop_assert!(queue.running_len() <= limit);
        }
    }
}
