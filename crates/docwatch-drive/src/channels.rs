//! Drive v3 push-notification channels
//!
//! A channel is a `web_hook` subscription: the store POSTs an empty body with
//! `X-Goog-*` headers to the channel address whenever the watched resource
//! changes. Channels expire; the `expiration` returned by the store is a
//! Unix timestamp in milliseconds, encoded as a string.
//!
//! See: <https://developers.google.com/drive/api/guides/push>

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use docwatch_core::domain::newtypes::{ChangeCursor, ChannelId, DocumentId};
use docwatch_core::ports::document_store::{ChannelInfo, ChannelRequest};

use crate::client::{Api, DriveClient};
use crate::DriveError;

/// Delivery mechanism requested for every channel
const CHANNEL_TYPE: &str = "web_hook";

// ============================================================================
// Drive API request/response types
// ============================================================================

/// Body of `files.watch` and `changes.watch`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchBody<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
}

/// Body of `channels.stop`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopBody<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<&'a str>,
}

/// A Drive `Channel` resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveChannel {
    id: String,
    resource_id: Option<String>,
    expiration: Option<String>,
}

impl DriveChannel {
    fn into_info(self) -> Result<ChannelInfo, DriveError> {
        let expires_at = self.expiration.as_deref().and_then(parse_expiration);
        Ok(ChannelInfo {
            channel_id: ChannelId::new(self.id)
                .map_err(|e| DriveError::InvalidResponse(e.to_string()))?,
            resource_id: self.resource_id,
            expires_at,
        })
    }
}

/// Parses the millisecond-epoch `expiration` value of a channel
pub fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

// ============================================================================
// Operations
// ============================================================================

async fn post_watch(
    client: &DriveClient,
    bearer: &str,
    path: &str,
    query: &[(&str, &str)],
    request: &ChannelRequest,
) -> Result<ChannelInfo> {
    let body = WatchBody {
        id: request.channel_id.as_str(),
        kind: CHANNEL_TYPE,
        address: &request.address,
    };

    let channel: DriveChannel = client
        .send(
            client
                .request(Method::POST, Api::Drive, path, bearer)
                .query(query)
                .json(&body),
        )
        .await
        .with_context(|| format!("Watch request for channel {} rejected", request.channel_id))?
        .json()
        .await
        .context("Failed to parse channel response")?;

    let info = channel.into_info()?;
    if info.channel_id != request.channel_id {
        return Err(DriveError::InvalidResponse(format!(
            "store echoed channel {} for request {}",
            info.channel_id, request.channel_id
        ))
        .into());
    }
    Ok(info)
}

/// Opens a channel scoped to a single file
pub async fn watch_document(
    client: &DriveClient,
    bearer: &str,
    id: &DocumentId,
    request: &ChannelRequest,
) -> Result<ChannelInfo> {
    let path = format!("/drive/v3/files/{}/watch", id.as_str());
    let info = post_watch(
        client,
        bearer,
        &path,
        &[("supportsAllDrives", "true")],
        request,
    )
    .await?;

    info!(document_id = %id, channel_id = %info.channel_id, "Opened file channel");
    Ok(info)
}

/// Opens a channel on the change feed, starting at `cursor`
pub async fn watch_changes(
    client: &DriveClient,
    bearer: &str,
    cursor: &ChangeCursor,
    request: &ChannelRequest,
) -> Result<ChannelInfo> {
    let info = post_watch(
        client,
        bearer,
        "/drive/v3/changes/watch",
        &[
            ("pageToken", cursor.as_str()),
            ("includeRemoved", "true"),
            ("supportsAllDrives", "true"),
        ],
        request,
    )
    .await?;

    info!(channel_id = %info.channel_id, cursor = %cursor, "Opened change channel");
    Ok(info)
}

/// Stops a channel
///
/// A channel the store no longer knows about counts as stopped.
pub async fn stop_channel(
    client: &DriveClient,
    bearer: &str,
    channel_id: &ChannelId,
    resource_id: Option<&str>,
) -> Result<()> {
    let body = StopBody {
        id: channel_id.as_str(),
        resource_id,
    };

    match client
        .send(
            client
                .request(Method::POST, Api::Drive, "/drive/v3/channels/stop", bearer)
                .json(&body),
        )
        .await
    {
        Ok(_) => {
            debug!(channel_id = %channel_id, "Stopped channel");
            Ok(())
        }
        Err(DriveError::NotFound(_)) => {
            debug!(channel_id = %channel_id, "Channel already gone");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to stop channel {channel_id}"))),
    }
}
