use std::sync::Arc;

use crate::transport::{CapturedMessage, Destination, MediaRef, Transport};

/// Upload the message's media once to the account's own saved-messages
/// chat and hand back the stored reference for reuse across every
/// destination in the current broadcast cycle.
///
/// Text-only messages and link-preview artifacts produce no handle. A
/// failed cache upload is non-fatal: the original reference is returned
/// instead, accepting a per-destination re-upload cost rather than
/// failing the cycle.
pub async fn cache_for_cycle(
    transport: &Arc<dyn Transport>,
    message: &CapturedMessage,
) -> Option<MediaRef> {
    let media = message.media.as_ref()?;
    if media.is_link_preview() {
        return None;
    }
    match transport.send(&Destination::Saved, "", Some(media), &[]).await {
        Ok(echo) => match echo.media {
            Some(stored) => {
                tracing::info!("media cached to saved messages for this cycle");
                Some(stored)
            }
            None => {
                tracing::warn!("saved-messages echo carried no media, using original reference");
                Some(media.clone())
            }
        },
        Err(e) => {
            tracing::warn!("media cache upload failed, using original reference: {e}");
            Some(media.clone())
        }
    }
}
