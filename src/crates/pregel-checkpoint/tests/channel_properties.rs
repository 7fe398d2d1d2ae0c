//! Property tests for channel merge rules and checkpoint round-trips

use pregel_checkpoint::{
    BaseChannel, Channel, CheckpointError, LastValueChannel, NamedBarrierValueChannel, Reducer,
    TopicChannel,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        Just(Value::Null),
    ]
}

proptest! {
    #[test]
    fn last_value_rejects_two_or_more_writes(writes in prop::collection::vec(scalar(), 2..8)) {
        let mut channel = LastValueChannel::new();
        let result = channel.update(writes);
        prop_assert!(matches!(result, Err(CheckpointError::InvalidUpdate(_))));
        prop_assert!(!channel.is_available());
    }

    #[test]
    fn last_value_accepts_exactly_one_write(value in scalar()) {
        let mut channel = LastValueChannel::new();
        prop_assert!(channel.update(vec![value.clone()]).unwrap());
        prop_assert_eq!(channel.get().unwrap(), value);
    }

    #[test]
    fn barrier_available_only_when_all_names_written(
        order in Just(vec!["A", "B", "C"]).prop_shuffle(),
        cut in 0usize..3,
    ) {
        let mut barrier = NamedBarrierValueChannel::new(["A", "B", "C"]);
        for name in &order[..cut] {
            barrier.update(vec![json!(name)]).unwrap();
        }
        prop_assert!(!barrier.is_available());

        for name in &order[cut..] {
            barrier.update(vec![json!(name)]).unwrap();
        }
        prop_assert!(barrier.is_available());
        prop_assert!(barrier.consume());
        prop_assert!(!barrier.is_available());
    }

    #[test]
    fn topic_round_trips(
        steps in prop::collection::vec(prop::collection::vec(scalar(), 0..4), 1..5),
        unique in any::<bool>(),
        accumulate in any::<bool>(),
    ) {
        let mut channel: Channel = TopicChannel::new()
            .with_unique(unique)
            .with_accumulate(accumulate)
            .into();
        for writes in steps {
            channel.update(writes).unwrap();
        }
        let restored = channel.from_checkpoint(channel.checkpoint()).unwrap();
        prop_assert_eq!(restored.get().ok(), channel.get().ok());
        prop_assert_eq!(restored.is_available(), channel.is_available());
    }

    #[test]
    fn sum_is_order_independent(mut values in prop::collection::vec(-1000i64..1000, 1..10)) {
        let mut forward = Channel::binary_operator(Reducer::Sum);
        forward.update(values.iter().map(|v| json!(v)).collect()).unwrap();

        values.reverse();
        let mut backward = Channel::binary_operator(Reducer::Sum);
        backward.update(values.iter().map(|v| json!(v)).collect()).unwrap();

        prop_assert_eq!(forward.get().unwrap(), backward.get().unwrap());
    }
}
