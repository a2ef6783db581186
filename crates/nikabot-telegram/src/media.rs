//! Inbound media handling for the Telegram adapter: downloads a photo,
//! voice note, or document via `get_file`/`download_file` (same pattern
//! as the teacher's `attach.rs`) and rehosts it through [`FileStore`] so
//! the upstream workflow — which cannot authenticate against the
//! Telegram Bot API — gets a plain HTTPS `image_url`/`audio_url` instead
//! of a `file_id` it can't resolve on its own.

use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

use nikabot_core::storage::FileStore;
use nikabot_store::{MediaOrigin, PendingMedia};

/// Extracts the single media attachment a Telegram message carries, if
/// any. Voice notes keep their `file_id` for the upstream to resolve
/// directly (it's short-lived but adequate for same-session playback
/// metadata); photos and documents are rehosted as stable URLs.
pub async fn extract_media(bot: &Bot, msg: &Message, files: &FileStore, max_bytes: u64) -> Option<PendingMedia> {
    if let Some(photos) = msg.photo() {
        let photo = photos.last()?;
        let uploaded = download_and_store(bot, &photo.file.id, "jpg", "image/jpeg", max_bytes, files).await?;
        return Some(PendingMedia {
            origin: MediaOrigin::Photo,
            image_url: Some(uploaded.url),
            image_file_id: Some(photo.file.id.clone()),
            image_mime_type: Some(uploaded.mime_type),
            width: Some(photo.width as u32),
            height: Some(photo.height as u32),
            audio_url: None,
            voice_file_id: None,
            mime_type: None,
            duration: None,
        });
    }

    if let Some(voice) = msg.voice() {
        return Some(PendingMedia {
            origin: MediaOrigin::Voice,
            image_url: None,
            image_file_id: None,
            image_mime_type: None,
            width: None,
            height: None,
            audio_url: None,
            voice_file_id: Some(voice.file.id.clone()),
            mime_type: voice.mime_type.as_ref().map(|m| m.to_string()),
            duration: Some(voice.duration.seconds() as f64),
        });
    }

    if let Some(audio) = msg.audio() {
        let mime = audio.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "audio/mpeg".to_string());
        let uploaded = download_and_store(bot, &audio.file.id, "mp3", &mime, max_bytes, files).await?;
        return Some(PendingMedia {
            origin: MediaOrigin::Audio,
            image_url: None,
            image_file_id: None,
            image_mime_type: None,
            width: None,
            height: None,
            audio_url: Some(uploaded.url),
            voice_file_id: None,
            mime_type: Some(uploaded.mime_type),
            duration: Some(audio.duration.seconds() as f64),
        });
    }

    if let Some(doc) = msg.document() {
        let mime = doc
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if !mime.starts_with("image/") {
            return None;
        }
        let uploaded = download_and_store(bot, &doc.file.id, "bin", &mime, max_bytes, files).await?;
        return Some(PendingMedia {
            origin: MediaOrigin::Photo,
            image_url: Some(uploaded.url),
            image_file_id: Some(doc.file.id.clone()),
            image_mime_type: Some(uploaded.mime_type),
            width: None,
            height: None,
            audio_url: None,
            voice_file_id: None,
            mime_type: None,
            duration: None,
        });
    }

    None
}

async fn download_and_store(
    bot: &Bot,
    file_id: &str,
    ext: &str,
    mime: &str,
    max_bytes: u64,
    files: &FileStore,
) -> Option<nikabot_core::storage::UploadedFile> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file_id, error = %e, "telegram: get_file failed");
            return None;
        }
    };

    if u64::from(file.size) > max_bytes {
        warn!(file_id, size = file.size, limit = max_bytes, "telegram: file exceeds size limit, skipping");
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "telegram: download_file failed");
        return None;
    }

    match files.save(&buf, Some(ext), mime).await {
        Ok(uploaded) => Some(uploaded),
        Err(e) => {
            warn!(file_id, error = %e, "telegram: failed to rehost downloaded media");
            None
        }
    }
}
