//! Property tests for deterministic identifiers and namespace layout.

use proptest::prelude::*;
use stategraph_core::types::{child_namespace, deterministic_task_id, TaskPath};

fn task_path() -> impl Strategy<Value = TaskPath> {
    prop_oneof![
        "[a-z_]{1,12}".prop_map(|node| TaskPath::Pull { node }),
        (0usize..64).prop_map(|index| TaskPath::Push { index }),
    ]
}

proptest! {
    #[test]
    fn task_ids_are_stable(checkpoint_id in "[a-f0-9-]{8,36}", path in task_path(), step in -1i64..100) {
        let first = deterministic_task_id(&checkpoint_id, &path, step);
        let second = deterministic_task_id(&checkpoint_id, &path, step);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn task_ids_never_collide_across_steps(checkpoint_id in "[a-f0-9-]{8,36}", path in task_path(), step in 0i64..100) {
        prop_assert_ne!(
            deterministic_task_id(&checkpoint_id, &path, step),
            deterministic_task_id(&checkpoint_id, &path, step + 1)
        );
    }

    #[test]
    fn child_namespaces_are_prefixed_by_the_parent(
        parent in "[a-z]{1,8}:[a-f0-9]{8}",
        node in "[a-z_]{1,10}",
        task_id in "[a-f0-9-]{16,36}",
    ) {
        let ns = child_namespace(&parent, &node, &task_id);
        let prefix = format!("{}:{}:", parent, node);
        prop_assert!(ns.starts_with(&prefix));
        // The tag is stable for a stable task id.
        prop_assert_eq!(ns.clone(), child_namespace(&parent, &node, &task_id));
    }
}
