//! Shared tests for ConversationRepo implementations

use uuid::Uuid;

use super::RepoTestContext;
use crate::{
    db::error::DbError,
    models::{
        CreateConversation, CreateMessage, MessageRole, MessageStatus, SupervisionMetadata,
    },
};

async fn create_conversation(ctx: &RepoTestContext<'_>, user_id: Uuid) -> Uuid {
    ctx.conversations
        .create(CreateConversation {
            user_id,
            class_id: None,
            model: "gpt-4o-mini".to_string(),
        })
        .await
        .expect("Failed to create conversation")
        .id
}

pub async fn test_create_and_get_conversation(ctx: &RepoTestContext<'_>) {
    let user_id = ctx.create_user().await;
    let org_id = ctx.create_org("School").await;
    let class_id = ctx.create_class(org_id, "History").await;

    let created = ctx
        .conversations
        .create(CreateConversation {
            user_id,
            class_id: Some(class_id),
            model: "claude-sonnet-4".to_string(),
        })
        .await
        .expect("Failed to create conversation");

    let fetched = ctx
        .conversations
        .get_by_id(created.id)
        .await
        .expect("Query failed")
        .expect("Conversation should exist");
    assert_eq!(fetched.user_id, user_id);
    assert_eq!(fetched.class_id, Some(class_id));
    assert_eq!(fetched.model, "claude-sonnet-4");
}

pub async fn test_messages_listed_in_order(ctx: &RepoTestContext<'_>) {
    let user_id = ctx.create_user().await;
    let conversation_id = create_conversation(ctx, user_id).await;

    ctx.conversations
        .append_message(CreateMessage::user(conversation_id, "What is a cell?"))
        .await
        .unwrap();
    ctx.conversations
        .append_message(CreateMessage {
            conversation_id,
            role: MessageRole::Assistant,
            content: "The smallest unit of life.".to_string(),
            tokens_input: 12,
            tokens_output: 7,
            cost_microcents: 141,
            co2_grams: 0.0038,
            status: MessageStatus::Complete,
            supervision_metadata: None,
        })
        .await
        .unwrap();

    let messages = ctx.conversations.list_messages(conversation_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].cost_microcents, 141);
    assert_eq!(messages[1].tokens_output, 7);
}

pub async fn test_partial_message_keeps_metadata(ctx: &RepoTestContext<'_>) {
    let user_id = ctx.create_user().await;
    let conversation_id = create_conversation(ctx, user_id).await;
    let metadata = SupervisionMetadata {
        subject: Some("math".to_string()),
        topic: Some("fractions".to_string()),
        activity_type: Some("homework".to_string()),
        struggle_flag: true,
    };

    ctx.conversations
        .append_message(CreateMessage::partial_assistant(
            conversation_id,
            "Half of",
            Some(metadata.clone()),
        ))
        .await
        .unwrap();

    let messages = ctx.conversations.list_messages(conversation_id).await.unwrap();
    assert_eq!(messages[0].status, MessageStatus::Partial);
    assert_eq!(messages[0].cost_microcents, 0);
    assert_eq!(messages[0].supervision_metadata, Some(metadata));
}

pub async fn test_append_bumps_updated_at(ctx: &RepoTestContext<'_>) {
    let user_id = ctx.create_user().await;
    let conversation_id = create_conversation(ctx, user_id).await;
    let before = ctx
        .conversations
        .get_by_id(conversation_id)
        .await
        .unwrap()
        .unwrap()
        .updated_at;

    ctx.conversations
        .append_message(CreateMessage::user(conversation_id, "hi"))
        .await
        .unwrap();

    let after = ctx
        .conversations
        .get_by_id(conversation_id)
        .await
        .unwrap()
        .unwrap()
        .updated_at;
    assert!(after >= before);
}

pub async fn test_append_to_missing_conversation(ctx: &RepoTestContext<'_>) {
    let result = ctx
        .conversations
        .append_message(CreateMessage::user(Uuid::new_v4(), "hello"))
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

mod sqlite_tests {
    use crate::db::tests::sqlite_test;

    sqlite_test!(test_create_and_get_conversation);
    sqlite_test!(test_messages_listed_in_order);
    sqlite_test!(test_partial_message_keeps_metadata);
    sqlite_test!(test_append_bumps_updated_at);
    sqlite_test!(test_append_to_missing_conversation);
}
