use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// A file received in a multipart request, held in memory until uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Avatar,
    CoverImage,
}

impl MediaKind {
    fn folder(self) -> &'static str {
        match self {
            MediaKind::Avatar => "avatars",
            MediaKind::CoverImage => "covers",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub key: String,
    pub url: String,
}

pub async fn upload_media(
    st: &AppState,
    kind: MediaKind,
    file: UploadFile,
) -> anyhow::Result<UploadedMedia> {
    anyhow::ensure!(!file.body.is_empty(), "empty upload");

    let ext = ext_from_mime(&file.content_type)
        .or_else(|| file.file_name.as_deref().and_then(ext_from_name))
        .unwrap_or("bin");
    let key = format!("{}/{}.{}", kind.folder(), Uuid::new_v4(), ext);
    st.storage
        .put_object(&key, file.body, &file.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let url = st.storage.public_url(&key);
    info!(%key, ?kind, "media uploaded");
    Ok(UploadedMedia { key, url })
}

/// Best-effort removal of an object whose owning write did not commit.
pub async fn discard_media(st: &AppState, media: &UploadedMedia) {
    if let Err(e) = st.storage.delete_object(&media.key).await {
        warn!(error = %e, key = %media.key, "failed to discard orphaned upload");
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn ext_from_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    ext_from_mime(&format!("image/{}", ext.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(name: Option<&str>, ct: &str) -> UploadFile {
        UploadFile {
            file_name: name.map(str::to_string),
            content_type: ct.into(),
            body: Bytes::from_static(b"\x89PNG fake"),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn test_ext_from_name() {
        assert_eq!(ext_from_name("me.PNG"), Some("png"));
        assert_eq!(ext_from_name("photo.jpeg"), Some("jpg"));
        assert_eq!(ext_from_name("noext"), None);
        assert_eq!(ext_from_name("archive.tar"), None);
    }

    #[tokio::test]
    async fn upload_returns_public_url_under_kind_folder() {
        let state = AppState::fake();
        let media = upload_media(&state, MediaKind::Avatar, png(None, "image/png"))
            .await
            .unwrap();
        assert!(media.key.starts_with("avatars/"));
        assert!(media.key.ends_with(".png"));
        assert_eq!(media.url, format!("https://fake.local/{}", media.key));
    }

    #[tokio::test]
    async fn upload_falls_back_to_file_name_extension() {
        let state = AppState::fake();
        let media = upload_media(
            &state,
            MediaKind::CoverImage,
            png(Some("banner.webp"), "application/octet-stream"),
        )
        .await
        .unwrap();
        assert!(media.key.starts_with("covers/"));
        assert!(media.key.ends_with(".webp"));
    }

    #[tokio::test]
    async fn upload_rejects_empty_body_and_storage_failure() {
        let state = AppState::fake();
        let empty = UploadFile {
            file_name: None,
            content_type: "image/png".into(),
            body: Bytes::new(),
        };
        assert!(upload_media(&state, MediaKind::Avatar, empty).await.is_err());

        let broken = AppState::fake_with_failing_storage();
        assert!(upload_media(&broken, MediaKind::Avatar, png(None, "image/png"))
            .await
            .is_err());
    }
}
