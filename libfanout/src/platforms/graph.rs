//! Pieces of the Facebook Graph API shared by the Facebook and Instagram
//! adapters: object ids, conversation inbox and page messaging.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::http::{read_json, ApiResult};
use crate::types::{ExternalUser, MessageMetadata, Platform, RawMessage};

const MESSAGE_FIELDS: &str = "id,message,from,created_time,attachments";

/// Upper bound on `paging.next` links followed per listing
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
pub(crate) struct GraphId {
    pub id: String,
    /// Set by `/photos` when the photo was published as its own post
    #[serde(default)]
    pub post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Option<GraphPaging>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GraphPaging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl GraphUser {
    fn into_external(self) -> ExternalUser {
        let name = self.name.or(self.username);
        ExternalUser::new(self.id, name)
    }
}

#[derive(Debug, Deserialize)]
struct GraphConversation {
    id: String,
    #[serde(default)]
    participants: Option<GraphList<GraphUser>>,
}

#[derive(Debug, Deserialize)]
struct GraphAttachment {
    #[serde(default)]
    image_data: Option<GraphImageData>,
    #[serde(default)]
    file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphImageData {
    url: String,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    from: Option<GraphUser>,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    attachments: Option<GraphList<GraphAttachment>>,
}

#[derive(Debug, Deserialize)]
struct GraphSendResponse {
    message_id: String,
}

/// Graph timestamps look like `2024-01-01T12:00:00+0000`
pub(crate) fn parse_graph_time(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.timestamp())
}

/// Collect a listing across pages. `next` links already carry the token
/// and cursor, so they are requested as-is.
async fn fetch_pages<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> ApiResult<Vec<T>> {
    let mut items = Vec::new();
    let mut request = client.get(url).query(query);
    let mut pages = 0;
    loop {
        let response = request.send().await?;
        let list: GraphList<T> = read_json(response).await?;
        pages += 1;
        items.extend(list.data);

        match list.paging.and_then(|p| p.next) {
            Some(next) if pages < MAX_PAGES => request = client.get(next),
            Some(_) => {
                tracing::warn!(url, pages, "Listing has more pages, stopping at the page limit");
                break;
            }
            None => break,
        }
    }
    Ok(items)
}

/// Read every conversation of a page and the messages inside it.
///
/// `inbox` is `Some("instagram")` for the Instagram inbox of the page.
/// Messages older than `since` are skipped.
pub(crate) async fn fetch_conversations(
    client: &reqwest::Client,
    api_base: &str,
    page_id: &str,
    access_token: &str,
    inbox: Option<&str>,
    platform: Platform,
    since: Option<i64>,
) -> ApiResult<Vec<RawMessage>> {
    let mut query = vec![("fields", "participants"), ("access_token", access_token)];
    if let Some(inbox) = inbox {
        query.push(("platform", inbox));
    }

    let conversations: Vec<GraphConversation> = fetch_pages(
        client,
        &format!("{}/{}/conversations", api_base, page_id),
        &query,
    )
    .await?;

    let mut messages = Vec::new();
    for conversation in conversations {
        let participants: Vec<ExternalUser> = conversation
            .participants
            .map(|p| p.data.into_iter().map(GraphUser::into_external).collect())
            .unwrap_or_default();

        let page: Vec<GraphMessage> = fetch_pages(
            client,
            &format!("{}/{}/messages", api_base, conversation.id),
            &[("fields", MESSAGE_FIELDS), ("access_token", access_token)],
        )
        .await?;

        for message in page {
            let Some(from) = message.from else {
                tracing::debug!(message_id = %message.id, "Skipping message without sender");
                continue;
            };
            let created_at = message.created_time.as_deref().and_then(parse_graph_time);
            if let (Some(since), Some(created_at)) = (since, created_at) {
                if created_at < since {
                    continue;
                }
            }

            let attachments: Vec<String> = message
                .attachments
                .map(|a| {
                    a.data
                        .into_iter()
                        .filter_map(|att| att.image_data.map(|img| img.url).or(att.file_url))
                        .collect()
                })
                .unwrap_or_default();
            let metadata = match platform {
                Platform::Instagram => MessageMetadata::Instagram { attachments },
                _ => MessageMetadata::Facebook { attachments },
            };

            messages.push(RawMessage {
                platform_message_id: message.id,
                thread_id: Some(conversation.id.clone()),
                from: from.into_external(),
                participants: participants.clone(),
                text: message.message,
                created_at,
                metadata: Some(metadata),
            });
        }
    }

    Ok(messages)
}

/// Send a text reply from a page; returns the message id
pub(crate) async fn send_page_message(
    client: &reqwest::Client,
    api_base: &str,
    page_id: &str,
    access_token: &str,
    recipient_id: &str,
    text: &str,
) -> ApiResult<String> {
    let body = serde_json::json!({
        "recipient": { "id": recipient_id },
        "message": { "text": text },
        "messaging_type": "RESPONSE",
    });

    let response = client
        .post(format!("{}/{}/messages", api_base, page_id))
        .query(&[("access_token", access_token)])
        .json(&body)
        .send()
        .await?;
    let sent: GraphSendResponse = read_json(response).await?;
    Ok(sent.message_id)
}
