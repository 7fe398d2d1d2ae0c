//! Property tests for deterministic write application

use pregel_checkpoint::{ChannelVersion, Checkpoint};
use pregel_core::pregel::{apply_writes, task_id, PregelTaskWrites};
use pregel_core::{BaseChannel, Channel, Channels, Reducer};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

fn channels() -> Channels {
    let mut channels = Channels::new();
    channels.insert("log".to_string(), Channel::topic());
    channels.insert("total".to_string(), Channel::binary_operator(Reducer::Sum));
    channels
}

fn tasks(values: &[i64]) -> Vec<PregelTaskWrites> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            PregelTaskWrites::new(
                format!("node_{:03}", i),
                vec![
                    ("log".to_string(), json!(value)),
                    ("total".to_string(), json!(value)),
                ],
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn apply_order_does_not_depend_on_completion_order(
        values in prop::collection::vec(-1000i64..1000, 1..12),
        seed in any::<u64>(),
    ) {
        let tasks = tasks(&values);
        let in_order: Vec<&PregelTaskWrites> = tasks.iter().collect();
        let mut shuffled = in_order.clone();
        // Deterministic shuffle driven by the seed
        let len = shuffled.len();
        for i in 0..len {
            let j = (seed.wrapping_mul(i as u64 + 1).wrapping_add(7) % len as u64) as usize;
            shuffled.swap(i, j);
        }

        let mut first = Checkpoint::empty();
        let mut first_channels = channels();
        apply_writes(&mut first, &mut first_channels, &in_order, &HashMap::new()).unwrap();

        let mut second = Checkpoint::empty();
        let mut second_channels = channels();
        apply_writes(&mut second, &mut second_channels, &shuffled, &HashMap::new()).unwrap();

        prop_assert_eq!(first_channels["log"].get().unwrap(), json!(values));
        prop_assert_eq!(first_channels["log"].get().unwrap(), second_channels["log"].get().unwrap());
        prop_assert_eq!(
            first_channels["total"].get().unwrap(),
            json!(values.iter().sum::<i64>())
        );
    }

    #[test]
    fn task_ids_depend_on_every_input(step in 0i32..100, version in 1i64..100) {
        let current = ChannelVersion::Int(version);
        let next = ChannelVersion::Int(version + 1);
        let triggers = BTreeMap::from([("a", &current)]);
        let bumped = BTreeMap::from([("a", &next)]);

        let id = task_id("checkpoint", "", step, "node", &triggers);
        prop_assert_eq!(&id, &task_id("checkpoint", "", step, "node", &triggers));
        prop_assert_ne!(&id, &task_id("checkpoint", "", step + 1, "node", &triggers));
        prop_assert_ne!(&id, &task_id("checkpoint", "", step, "other", &triggers));
        prop_assert_ne!(&id, &task_id("checkpoint", "", step, "node", &bumped));
        prop_assert_ne!(&id, &task_id("other", "", step, "node", &triggers));
        prop_assert_ne!(&id, &task_id("checkpoint", "sub", step, "node", &triggers));
    }
}
