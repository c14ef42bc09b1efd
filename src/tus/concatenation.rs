//! Concatenation extension
//!
//! Resolves and validates the partial uploads referenced by
//! `Upload-Concat: final;<urls>` and assembles the final upload.

use tokio_util::sync::CancellationToken;

use super::headers::resolve_file_id;
use crate::error::{Result, TusError};
use crate::store::{Concatenation, ConcatenationStore, TusStore};

/// Map referenced URLs to upload ids, keeping declared order
pub fn resolve_parts(urls: &[String], url_path: &str) -> Result<Vec<String>> {
    urls.iter()
        .map(|url| {
            resolve_file_id(url, url_path).ok_or_else(|| {
                TusError::InvalidConcatenation(format!("Unable to parse upload URL {url}"))
            })
        })
        .collect()
}

/// Check that a referenced upload can be part of a final upload and return
/// its length.
///
/// The upload must be tagged partial, must not itself be final and must be
/// complete.
pub async fn check_part(
    core: &dyn TusStore,
    concatenation: &dyn ConcatenationStore,
    file_id: &str,
) -> Result<u64> {
    match concatenation.get_concatenation(file_id).await? {
        Concatenation::Partial => {}
        Concatenation::Final(_) => {
            return Err(TusError::InvalidConcatenation(format!(
                "Upload {file_id} is a final upload and cannot be concatenated"
            )))
        }
        Concatenation::None => {
            return Err(TusError::InvalidConcatenation(format!(
                "Upload {file_id} is not a partial upload"
            )))
        }
    }

    let length = core.get_upload_length(file_id).await?;
    let offset = core.get_upload_offset(file_id).await?;
    match length {
        Some(length) if length == offset => Ok(length),
        _ => Err(TusError::InvalidConcatenation(format!(
            "Upload {file_id} is not complete"
        ))),
    }
}

/// Assemble the final upload, byte order follows `parts`
pub async fn create_final(
    concatenation: &dyn ConcatenationStore,
    parts: &[String],
    metadata: Option<String>,
    cancel: CancellationToken,
) -> Result<String> {
    Ok(concatenation
        .create_final_file(parts, metadata, cancel)
        .await?)
}

/// `Upload-Concat` response value for an upload
pub fn concat_header(concatenation: &Concatenation, url_path: &str) -> Option<String> {
    match concatenation {
        Concatenation::None => None,
        Concatenation::Partial => Some("partial".to_string()),
        Concatenation::Final(parts) => {
            let base = url_path.trim_end_matches('/');
            let urls: Vec<String> = parts.iter().map(|part| format!("{base}/{part}")).collect();
            Some(format!("final;{}", urls.join(" ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CreationStore, InMemoryStore};
    use axum::body::Bytes;
    use futures::{stream, StreamExt};

    async fn partial(store: &InMemoryStore, data: &'static [u8], length: u64) -> String {
        let id = store
            .create_partial_file(Some(length), None, CancellationToken::new())
            .await
            .unwrap();
        store
            .append_data(
                &id,
                stream::iter(vec![Ok(Bytes::from_static(data))]).boxed(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        id
    }

    #[test]
    fn test_resolve_parts_keeps_order() {
        let urls = vec!["/files/b".to_string(), "http://host/files/a".to_string()];
        assert_eq!(
            resolve_parts(&urls, "/files").unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );

        let bad = vec!["/elsewhere/a".to_string()];
        assert!(matches!(
            resolve_parts(&bad, "/files"),
            Err(TusError::InvalidConcatenation(_))
        ));
    }

    #[tokio::test]
    async fn test_check_part_accepts_complete_partial() {
        let store = InMemoryStore::new();
        let id = partial(&store, b"0123456789", 10).await;
        assert_eq!(check_part(&store, &store, &id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_check_part_rejects_incomplete() {
        let store = InMemoryStore::new();
        let id = partial(&store, b"01234", 10).await;
        assert!(matches!(
            check_part(&store, &store, &id).await,
            Err(TusError::InvalidConcatenation(_))
        ));
    }

    #[tokio::test]
    async fn test_check_part_rejects_plain_and_final_uploads() {
        let store = InMemoryStore::new();
        let plain = store
            .create_file(Some(0), None, CancellationToken::new())
            .await
            .unwrap();
        assert!(check_part(&store, &store, &plain).await.is_err());

        let part = partial(&store, b"ab", 2).await;
        let final_id = create_final(&store, &[part], None, CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            check_part(&store, &store, &final_id).await,
            Err(TusError::InvalidConcatenation(msg)) if msg.contains("final")
        ));
    }

    #[test]
    fn test_concat_header() {
        assert_eq!(concat_header(&Concatenation::None, "/files"), None);
        assert_eq!(
            concat_header(&Concatenation::Partial, "/files").as_deref(),
            Some("partial")
        );
        assert_eq!(
            concat_header(
                &Concatenation::Final(vec!["a".into(), "b".into()]),
                "/files/"
            )
            .as_deref(),
            Some("final;/files/a /files/b")
        );
    }
}
