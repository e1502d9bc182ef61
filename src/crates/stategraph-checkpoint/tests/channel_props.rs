//! Property tests for the channel algebra and version ordering.

use proptest::prelude::*;
use serde_json::{json, Value};
use stategraph_checkpoint::{
    BinaryOperatorChannel, Channel, ChannelVersion, LastValueChannel, TopicChannel,
};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(|b| json!(b)),
        "[a-z]{0,8}".prop_map(|s| json!(s)),
    ]
}

proptest! {
    #[test]
    fn topic_accumulates_all_writes_in_order(batches in prop::collection::vec(prop::collection::vec(scalar(), 0..4), 0..6)) {
        let mut channel = TopicChannel::new("log");
        let mut expected = Vec::new();
        for batch in &batches {
            expected.extend(batch.iter().cloned());
            channel.update(batch.clone()).unwrap();
        }
        if expected.is_empty() {
            prop_assert!(!channel.is_available());
        } else {
            prop_assert_eq!(channel.get().unwrap(), Value::Array(expected));
        }
    }

    #[test]
    fn last_value_tracks_the_latest_single_write(values in prop::collection::vec(scalar(), 1..8)) {
        let mut channel = LastValueChannel::new("slot");
        for value in &values {
            channel.update(vec![value.clone()]).unwrap();
        }
        prop_assert_eq!(channel.get().unwrap(), values.last().unwrap().clone());
    }

    #[test]
    fn sum_operator_folds_to_the_arithmetic_sum(values in prop::collection::vec(-1000i64..1000, 1..10)) {
        let mut channel = BinaryOperatorChannel::sum("total");
        channel
            .update(values.iter().map(|n| json!(*n as f64)).collect())
            .unwrap();
        let expected: f64 = values.iter().map(|n| *n as f64).sum();
        prop_assert_eq!(channel.get().unwrap(), json!(expected));
    }

    #[test]
    fn checkpoint_restore_is_lossless(values in prop::collection::vec(scalar(), 1..6)) {
        let mut channel = TopicChannel::new("log");
        channel.update(values).unwrap();
        let snapshot = channel.checkpoint().unwrap();

        let mut restored = TopicChannel::new("log");
        restored.restore(snapshot).unwrap();
        prop_assert_eq!(restored.get().unwrap(), channel.get().unwrap());
    }

    #[test]
    fn integer_versions_order_like_integers(a in any::<u64>(), b in any::<u64>()) {
        let va = ChannelVersion::Int(a);
        let vb = ChannelVersion::Int(b);
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
    }

    #[test]
    fn string_versions_always_order_after_integers(n in any::<u64>(), s in "[a-z0-9]{1,12}") {
        prop_assert!(ChannelVersion::Str(s) > ChannelVersion::Int(n));
    }
}
