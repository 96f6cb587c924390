#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::memory::MessageRole;
    use crate::orchestrator::Role;
    use crate::session::{SessionError, SessionStore};

    fn store() -> SessionStore {
        SessionStore::new(60, Role::default())
    }

    /// 把会话的访问时间拨回`minutes`分钟前
    fn age(store: &SessionStore, id: &str, minutes: i64) {
        store
            .update(id, |s| s.last_accessed = Utc::now() - Duration::minutes(minutes))
            .unwrap();
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let created = store.create_session("abc");
        assert_eq!(created.selected_role, Role::RequirementsAnalyst);

        store
            .update("abc", |s| {
                s.push_message(MessageRole::User, "hello");
                s.indexed_file_names.insert("spec.pdf".to_string());
                s.selected_role = Role::TestEngineer;
            })
            .unwrap();

        let session = store.get_session("abc").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.selected_role, Role::TestEngineer);
        assert!(session.indexed_file_names.contains("spec.pdf"));
    }

    #[test]
    fn test_missing_session_is_an_error() {
        let store = store();
        assert_eq!(
            store.get_session("nope").unwrap_err(),
            SessionError::NotFound("nope".to_string())
        );
        assert!(store.update("nope", |_| ()).is_err());
        assert!(!store.delete_session("nope"));
    }

    #[test]
    fn test_expired_session_disappears_on_lookup() {
        let store = store();
        store.create_session("old");
        store.create_session("fresh");
        age(&store, "old", 61);
        age(&store, "fresh", 59);

        assert!(store.get_session("old").is_err());
        assert!(store.get_session("fresh").is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_runs_cleanup() {
        let store = store();
        store.create_session("a");
        store.create_session("b");
        age(&store, "a", 120);

        store.create_session("c");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_or_create_and_delete() {
        let store = store();
        let first = store.get_or_create_session("s1");
        store
            .update("s1", |s| s.push_message(MessageRole::Assistant, "hi"))
            .unwrap();
        let second = store.get_or_create_session("s1");
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.messages.len(), 1);

        assert!(store.delete_session("s1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_access_refreshes_ttl() {
        let store = store();
        store.create_session("s");
        age(&store, "s", 59);
        store.get_session("s").unwrap();
        assert_eq!(store.cleanup_expired(), 0);
        assert!(store.get_session("s").is_ok());
    }
}
