use super::record::{TaskRow, TaskStatus};

/// The next task to run, assuming `tasks` is ordered by `ordering` ascending and the
/// flow was eligible to be claimed (no BLOCKED task, at least one PENDING task). The
/// cascading-failure invariant guarantees every task before the first PENDING one is
/// already SUCCESS, so the first PENDING task found is always the correct one.
pub fn find_next_task(tasks: &[TaskRow]) -> Option<&TaskRow> {
    tasks.iter().find(|task| task.status == TaskStatus::Pending)
}

/// Ids of every PENDING task that must flip straight to FAILURE because an earlier
/// task in the same flow just failed.
pub fn cascade_failure_targets(tasks: &[TaskRow]) -> Vec<uuid::Uuid> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .map(|task| task.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn task(ordering: i32, status: TaskStatus) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            name: "t".to_owned(),
            ordering,
            status,
            args: json!({}),
            output: json!({}),
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn finds_first_pending_task_in_order() {
        let tasks = vec![
            task(0, TaskStatus::Success),
            task(1, TaskStatus::Pending),
            task(2, TaskStatus::Pending),
        ];

        let next = find_next_task(&tasks).unwrap();
        assert_eq!(next.ordering, 1);
    }

    #[test]
    fn no_pending_task_means_nothing_to_advance() {
        let tasks = vec![task(0, TaskStatus::Success), task(1, TaskStatus::Success)];
        assert!(find_next_task(&tasks).is_none());
    }

    #[test]
    fn cascade_targets_only_pending_tasks() {
        let tasks = vec![
            task(0, TaskStatus::Failure),
            task(1, TaskStatus::Pending),
            task(2, TaskStatus::Pending),
        ];

        assert_eq!(cascade_failure_targets(&tasks).len(), 2);
    }
}
