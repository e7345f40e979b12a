use crate::models::notification::NewUserNotification;
use crate::store::{BatchWriter, DocumentStore, StoreError, WriteOp};

/// Write one copy of `template` into each recipient's notification list.
/// Returns the number of records written. No push is sent.
pub async fn fan_out(
    store: &dyn DocumentStore,
    user_ids: &[String],
    template: &NewUserNotification,
) -> Result<usize, StoreError> {
    let mut writer = BatchWriter::new(store);
    for user_id in user_ids {
        writer
            .push(WriteOp::CreateUserNotification {
                user_id: user_id.clone(),
                notification: template.clone(),
            })
            .await?;
    }
    let stats = writer.finish().await?;

    tracing::info!(
        kind = %template.kind,
        written = stats.written,
        commits = stats.commits,
        "fanned out notification records"
    );
    Ok(stats.written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_one_record_per_recipient() {
        let store = MemoryStore::new();
        let ids: Vec<String> = (0..1001).map(|i| format!("u{}", i)).collect();
        let template = NewUserNotification::new("new_event", Some("creator".into()))
            .with_field("eventId", "e1");

        let written = fan_out(&store, &ids, &template).await.unwrap();
        assert_eq!(written, 1001);
        assert_eq!(store.commit_count(), 3);

        let records = store.all_notifications();
        assert_eq!(records.len(), 1001);
        assert!(records.iter().all(|r| !r.is_read && r.kind == "new_event"));
        assert_eq!(records[0].fields["eventId"], "e1");
    }

    #[tokio::test]
    async fn test_empty_recipients_no_commit() {
        let store = MemoryStore::new();
        let written = fan_out(&store, &[], &NewUserNotification::new("like", None))
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(store.commit_count(), 0);
    }
}
