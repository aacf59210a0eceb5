use crate::task::TaskStatus;
use uuid::Uuid;

/// A filter over task records, used by `find_one`, `cancel_task`, and the
/// test-only `delete_many`.
///
/// Construction always goes through [`TaskFilter::by_id`] or
/// [`TaskFilter::by_name`], so an empty filter — the one source of the
/// "matches every pending record" hazard flagged for `cancelTask` — cannot
/// be built at all.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub(crate) id: Option<Uuid>,
    pub(crate) name: Option<String>,
    pub(crate) status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            name: None,
            status: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
            status: None,
        }
    }

    pub fn and_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    pub fn matches(&self, task: &crate::task::Task) -> bool {
        if let Some(id) = self.id {
            if task.id != id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &task.name != name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use chrono::Utc;

    #[test]
    fn by_id_matches_only_that_id() {
        let task = Task::builder().name("x").scheduled_at(Utc::now()).build();
        let other = Uuid::new_v4();
        assert!(TaskFilter::by_id(task.id).matches(&task));
        assert!(!TaskFilter::by_id(other).matches(&task));
    }

    #[test]
    fn by_name_and_status_combine() {
        let task = Task::builder().name("getAnswer").scheduled_at(Utc::now()).build();
        let filter = TaskFilter::by_name("getAnswer").and_status(TaskStatus::Pending);
        assert!(filter.matches(&task));

        let filter = TaskFilter::by_name("getAnswer").and_status(TaskStatus::Succeeded);
        assert!(!filter.matches(&task));
    }
}
