#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use tokio::sync::oneshot;

    use crate::tasks::{TaskRegistry, TaskStatus};

    async fn wait_until_finished<T: Clone + Send + 'static>(registry: &TaskRegistry<T>, id: &str) {
        for _ in 0..200 {
            if registry.status(id) != TaskStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} did not finish", id);
    }

    #[tokio::test]
    async fn test_completed_task_keeps_result() {
        let registry = TaskRegistry::new();
        let id = registry.start("market analysis", async { Ok("report".to_string()) });
        assert!(id.starts_with("dr_"));

        wait_until_finished(&registry, &id).await;
        assert_eq!(registry.status(&id), TaskStatus::Completed);
        assert_eq!(registry.result(&id).as_deref(), Some("report"));

        let record = registry.record(&id).unwrap();
        assert_eq!(record.label, "market analysis");
        assert!(record.completed_at.is_some());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_running_until_job_finishes() {
        let registry = TaskRegistry::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let id = registry.start("slow", async move { Ok::<_, anyhow::Error>(rx.await?) });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.status(&id), TaskStatus::Running);
        assert!(registry.result(&id).is_none());

        tx.send(7).unwrap();
        wait_until_finished(&registry, &id).await;
        assert_eq!(registry.result(&id), Some(7));
    }

    #[tokio::test]
    async fn test_failed_task_records_error() {
        let registry: TaskRegistry<String> = TaskRegistry::new();
        let id = registry.start("broken", async { Err(anyhow!("search backend down")) });

        wait_until_finished(&registry, &id).await;
        assert_eq!(registry.status(&id), TaskStatus::Error);
        let record = registry.record(&id).unwrap();
        assert_eq!(record.error.as_deref(), Some("search backend down"));
        assert!(registry.result(&id).is_none());
    }

    #[tokio::test]
    async fn test_panicking_task_is_an_error() {
        let registry: TaskRegistry<String> = TaskRegistry::new();
        let id = registry.start("panics", async {
            if true {
                panic!("boom");
            }
            Ok(String::new())
        });

        wait_until_finished(&registry, &id).await;
        assert_eq!(registry.status(&id), TaskStatus::Error);
        assert!(registry.record(&id).unwrap().error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_unknown_id_and_prune() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.status("dr_missing"), TaskStatus::NotFound);
        assert_eq!(TaskStatus::NotFound.as_str(), "not_found");

        let id = registry.start("quick", async { Ok(1) });
        wait_until_finished(&registry, &id).await;
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.prune_finished(), 1);
        assert_eq!(registry.status(&id), TaskStatus::NotFound);
    }
}
