//! Push a file to the content host and get back its resource id.

use std::path::Path;

use gemini_api::client::CancellationSignal;
use gemini_api::headers::{push_headers, to_header_map};
use gemini_api::payload::{detect_mime, upload_form};
use gemini_api::{CookieBundle, Endpoint, ErrorKind, FileAttachment, GeminiError, GeminiHttpClient, HeaderProfile};
use serde::{Deserialize, Serialize};

/// A file the service has accepted; attach it to a chat turn by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedResource {
    pub resource_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl UploadedResource {
    pub fn to_attachment(&self) -> FileAttachment {
        FileAttachment::new(self.resource_id.clone(), self.file_name.clone())
    }
}

/// Outcome of one push: the resource plus any cookies the host set.
pub(crate) struct PushedFile {
    pub resource: UploadedResource,
    pub set_cookies: Vec<String>,
}

/// File name used on the wire for `path`.
pub(crate) fn file_name_of(path: &Path) -> Result<String, GeminiError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            GeminiError::new(
                ErrorKind::Upload,
                Endpoint::Upload,
                format!("{} has no usable file name", path.display()),
            )
        })
}

pub(crate) async fn read_file(path: &Path) -> Result<Vec<u8>, GeminiError> {
    tokio::fs::read(path).await.map_err(|error| {
        GeminiError::new(
            ErrorKind::Upload,
            Endpoint::Upload,
            format!("failed to read {}: {error}", path.display()),
        )
    })
}

/// Upload with cookies only; the access token is not part of this request.
pub(crate) async fn push_file(
    http: &GeminiHttpClient,
    cookies: &CookieBundle,
    file_name: &str,
    bytes: Vec<u8>,
    cancellation: Option<&CancellationSignal>,
) -> Result<PushedFile, GeminiError> {
    let mime_type = detect_mime(file_name);
    let size_bytes = bytes.len() as u64;
    let form = upload_form(file_name, &mime_type, bytes)?;

    let mut headers = http.headers(Endpoint::Upload, HeaderProfile::Xhr, None, cookies)?;
    headers.extend(to_header_map(Endpoint::Upload, &push_headers())?);

    let request = http.build_multipart_post(&http.endpoints().upload, headers, form);
    let response = http.execute(Endpoint::Upload, request, cancellation).await?;

    if !response.is_success() {
        return Err(GeminiError::new(
            ErrorKind::Upload,
            Endpoint::Upload,
            format!("upload of {file_name} returned HTTP {}", response.status),
        )
        .with_status(response.status)
        .with_body(&response.body));
    }

    let resource_id = response.body.trim();
    if resource_id.is_empty() {
        return Err(GeminiError::new(
            ErrorKind::Upload,
            Endpoint::Upload,
            format!("upload of {file_name} returned no resource id"),
        )
        .with_status(response.status));
    }

    tracing::debug!(file_name, mime_type = %mime_type, size_bytes, "file uploaded");
    Ok(PushedFile {
        resource: UploadedResource {
            resource_id: resource_id.to_owned(),
            file_name: file_name.to_owned(),
            mime_type,
            size_bytes,
        },
        set_cookies: response.set_cookies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_carries_id_and_name() {
        let resource = UploadedResource {
            resource_id: "/contrib_service/ttl_1d/abc".to_owned(),
            file_name: "photo.png".to_owned(),
            mime_type: "image/png".to_owned(),
            size_bytes: 3,
        };
        assert_eq!(
            resource.to_attachment(),
            FileAttachment::new("/contrib_service/ttl_1d/abc", "photo.png")
        );
    }

    #[test]
    fn file_name_is_taken_from_path() {
        let name = file_name_of(Path::new("/tmp/notes/report.pdf")).expect("name");
        assert_eq!(name, "report.pdf");
        assert_eq!(
            file_name_of(Path::new("/")).expect_err("root").kind,
            ErrorKind::Upload
        );
    }
}
